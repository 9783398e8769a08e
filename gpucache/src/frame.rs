// Copyright 2026 gpucache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Instant;

use crate::config::FramePurgeConfig;

/// Tracks the frame phase to defer purges that would stall an in-flight frame.
#[derive(Debug)]
pub(crate) struct FramePolicy {
    config: FramePurgeConfig,
    frame_count: u64,
    frame_began: Option<Instant>,
}

impl FramePolicy {
    pub(crate) fn new(config: FramePurgeConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            frame_began: None,
        }
    }

    pub(crate) fn set_config(&mut self, config: FramePurgeConfig) {
        self.config = config;
    }

    pub(crate) fn begin_frame(&mut self) {
        self.frame_count += 1;
        self.frame_began = Some(Instant::now());
    }

    pub(crate) fn end_frame(&mut self) {
        self.frame_began = None;
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn in_frame(&self) -> bool {
        self.frame_began.is_some()
    }

    pub(crate) fn allow_to_purge(&self, next_frame_arrived: Option<&dyn Fn() -> bool>) -> bool {
        if !self.config.enabled || !self.in_frame() {
            return true;
        }
        if next_frame_arrived.is_some_and(|f| f()) {
            return true;
        }
        self.frame_began
            .is_some_and(|began| began.elapsed() >= self.config.overtime)
    }

    /// Return `true` if a purge for `over_by` bytes over the limit may be postponed.
    pub(crate) fn should_defer(&self, over_by: usize, next_frame_arrived: Option<&dyn Fn() -> bool>) -> bool {
        over_by <= self.config.max_deferred_bytes && !self.allow_to_purge(next_frame_arrived)
    }
}

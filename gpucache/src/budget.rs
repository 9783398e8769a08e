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

use std::sync::Arc;

use gpucache_common::metrics::model::Metrics;
use hashbrown::{HashMap, HashSet};

use crate::listener::OverflowCallback;

/// Aggregate byte and count accounting, including per-process attribution.
pub(crate) struct Budget {
    max_bytes: usize,
    soft_limit_ratio: f64,

    bytes: usize,
    budgeted_bytes: usize,
    purgeable_bytes: usize,
    count: usize,
    budgeted_count: usize,

    pid_limit: Option<usize>,
    overflow: Option<OverflowCallback>,
    pid_bytes: HashMap<u32, usize>,
    notified: HashSet<u32>,

    metrics: Arc<Metrics>,
}

impl Budget {
    pub(crate) fn new(max_bytes: usize, soft_limit_ratio: f64, metrics: Arc<Metrics>) -> Self {
        Self {
            max_bytes,
            soft_limit_ratio,
            bytes: 0,
            budgeted_bytes: 0,
            purgeable_bytes: 0,
            count: 0,
            budgeted_count: 0,
            pid_limit: None,
            overflow: None,
            pid_bytes: HashMap::new(),
            notified: HashSet::new(),
            metrics,
        }
    }

    pub(crate) fn set_limit(&mut self, max_bytes: usize) {
        self.max_bytes = max_bytes;
    }

    pub(crate) fn set_soft_limit_ratio(&mut self, ratio: f64) {
        self.soft_limit_ratio = ratio;
    }

    pub(crate) fn set_pid_limit(&mut self, limit: Option<usize>, overflow: Option<OverflowCallback>) {
        self.pid_limit = limit;
        if overflow.is_some() {
            self.overflow = overflow;
        }
    }

    pub(crate) fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub(crate) fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn budgeted_bytes(&self) -> usize {
        self.budgeted_bytes
    }

    pub(crate) fn purgeable_bytes(&self) -> usize {
        self.purgeable_bytes
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn budgeted_count(&self) -> usize {
        self.budgeted_count
    }

    pub(crate) fn pid_bytes(&self, pid: u32) -> usize {
        self.pid_bytes.get(&pid).copied().unwrap_or_default()
    }

    pub(crate) fn pids(&self) -> impl Iterator<Item = (u32, usize)> + '_ {
        self.pid_bytes.iter().map(|(pid, bytes)| (*pid, *bytes))
    }

    pub(crate) fn is_notified(&self, pid: u32) -> bool {
        self.notified.contains(&pid)
    }

    pub(crate) fn effective_limit(&self, contention: bool) -> usize {
        if contention {
            (self.max_bytes as f64 * self.soft_limit_ratio) as usize
        } else {
            self.max_bytes
        }
    }

    pub(crate) fn over_budget(&self, contention: bool) -> bool {
        self.budgeted_bytes > self.effective_limit(contention)
    }

    pub(crate) fn would_fit(&self, bytes: usize) -> bool {
        self.budgeted_bytes
            .checked_add(bytes)
            .is_some_and(|total| total <= self.max_bytes)
    }

    pub(crate) fn on_insert(&mut self, size: usize, budgeted: bool, pid: Option<u32>) {
        self.count += 1;
        self.bytes += size;
        if budgeted {
            self.budgeted_count += 1;
            self.budgeted_bytes += size;
        }
        if let Some(pid) = pid {
            self.add_pid_bytes(pid, size);
        }
        self.update_gauges();
    }

    pub(crate) fn on_remove(&mut self, size: usize, budgeted: bool, pid: Option<u32>) {
        self.count -= 1;
        self.bytes -= size;
        if budgeted {
            self.budgeted_count -= 1;
            self.budgeted_bytes -= size;
        }
        if let Some(pid) = pid {
            self.sub_pid_bytes(pid, size);
        }
        self.update_gauges();
    }

    pub(crate) fn on_budgeted_change(&mut self, size: usize, budgeted: bool) {
        if budgeted {
            self.budgeted_count += 1;
            self.budgeted_bytes += size;
        } else {
            self.budgeted_count -= 1;
            self.budgeted_bytes -= size;
        }
        tracing::debug!(
            "[resource cache]: budget status changed, budgeted: {budgeted}, size: {size}, budgeted bytes: {}",
            self.budgeted_bytes
        );
        self.update_gauges();
    }

    pub(crate) fn add_purgeable(&mut self, size: usize) {
        self.purgeable_bytes += size;
        self.metrics.resource_purgeable_bytes.absolute(self.purgeable_bytes as _);
    }

    pub(crate) fn sub_purgeable(&mut self, size: usize) {
        self.purgeable_bytes -= size;
        self.metrics.resource_purgeable_bytes.absolute(self.purgeable_bytes as _);
    }

    fn add_pid_bytes(&mut self, pid: u32, size: usize) {
        let bytes = self.pid_bytes.entry(pid).or_default();
        *bytes += size;
        let bytes = *bytes;

        let (Some(limit), Some(overflow)) = (self.pid_limit, self.overflow.as_ref()) else {
            return;
        };
        if bytes > limit && self.notified.insert(pid) {
            tracing::warn!("[resource cache]: pid {pid} exceeds gpu memory limit, bytes: {bytes}, limit: {limit}");
            self.metrics.resource_overflow.increase(1);
            overflow(pid, bytes);
        }
    }

    fn sub_pid_bytes(&mut self, pid: u32, size: usize) {
        let Some(bytes) = self.pid_bytes.get_mut(&pid) else {
            return;
        };
        *bytes -= size;
        if *bytes == 0 {
            self.pid_bytes.remove(&pid);
            self.notified.remove(&pid);
        }
    }

    fn update_gauges(&self) {
        self.metrics.resource_bytes.absolute(self.bytes as _);
        self.metrics.resource_budgeted_bytes.absolute(self.budgeted_bytes as _);
        self.metrics.resource_count.absolute(self.count as _);
    }
}

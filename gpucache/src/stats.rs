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

use std::fmt::Display;

/// Point-in-time snapshot of a resource cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Resources tracked by the cache.
    pub resource_count: usize,
    /// Budgeted resources.
    pub budgeted_count: usize,
    /// Resources in the purgeable queue.
    pub purgeable_count: usize,
    /// Resources available for scratch reuse.
    pub scratch_count: usize,
    /// Resources holding a unique key.
    pub unique_count: usize,
    /// Bytes of all resources.
    pub bytes: usize,
    /// Bytes of budgeted resources.
    pub budgeted_bytes: usize,
    /// Bytes of resources in the purgeable queue.
    pub purgeable_bytes: usize,
    /// Budget ceiling.
    pub max_bytes: usize,
    /// Attributed bytes per process, ordered by pid.
    pub bytes_by_pid: Vec<(u32, usize)>,
}

impl Display for CacheStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "budget: {} / {} bytes", self.budgeted_bytes, self.max_bytes)?;
        writeln!(
            f,
            "resources: {} ({} budgeted, {} purgeable, {} scratch, {} unique)",
            self.resource_count, self.budgeted_count, self.purgeable_count, self.scratch_count, self.unique_count
        )?;
        writeln!(f, "bytes: {} ({} purgeable)", self.bytes, self.purgeable_bytes)?;
        for (pid, bytes) in self.bytes_by_pid.iter() {
            writeln!(f, "pid {pid}: {bytes} bytes")?;
        }
        Ok(())
    }
}

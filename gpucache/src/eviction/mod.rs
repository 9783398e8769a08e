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

//! Containers that order cached resources for eviction.

use crate::resource::ResourceId;

pub(crate) mod non_purgeable;
pub(crate) mod purgeable;

pub(crate) use non_purgeable::NonPurgeableList;
pub(crate) use purgeable::PurgeableQueue;

/// Where a resource currently lives. The index is the back-pointer into the owning container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    Detached,
    NonPurgeable(usize),
    Purgeable(usize),
}

/// Access to the per-resource state the eviction containers maintain.
pub(crate) trait PositionStore {
    fn timestamp(&self, id: ResourceId) -> u32;
    fn set_position(&mut self, id: ResourceId, position: Position);
}

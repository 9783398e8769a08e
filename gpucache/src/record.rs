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

use std::{sync::Arc, time::Instant};

use hashbrown::HashMap;

use crate::{
    eviction::{Position, PositionStore},
    key::{ScratchKey, UniqueKey},
    resource::{BudgetedType, GpuResource, ResourceFlags, ResourceId, ResourceTag, Shared},
};

/// Cache-side bookkeeping of one resource.
pub(crate) struct Record<R> {
    pub(crate) shared: Arc<Shared<R>>,
    pub(crate) size: usize,
    pub(crate) budgeted_type: BudgetedType,
    pub(crate) scratch_key: Option<ScratchKey>,
    pub(crate) unique_key: Option<UniqueKey>,
    pub(crate) tag: ResourceTag,
    pub(crate) flags: ResourceFlags,
    pub(crate) refs: usize,
    pub(crate) command_buffer_usages: usize,
    pub(crate) position: Position,
    pub(crate) timestamp: u32,
    pub(crate) purgeable_since: Option<Instant>,
}

impl<R> Record<R>
where
    R: GpuResource,
{
    pub(crate) fn new(
        shared: Arc<Shared<R>>,
        size: usize,
        budgeted_type: BudgetedType,
        scratch_key: Option<ScratchKey>,
        tag: ResourceTag,
        flags: ResourceFlags,
    ) -> Self {
        Self {
            shared,
            size,
            budgeted_type,
            scratch_key,
            unique_key: None,
            tag,
            flags,
            refs: 1,
            command_buffer_usages: 0,
            position: Position::Detached,
            timestamp: 0,
            purgeable_since: None,
        }
    }

    pub(crate) fn is_budgeted(&self) -> bool {
        self.budgeted_type == BudgetedType::Budgeted
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.refs == 0 && self.command_buffer_usages == 0
    }

    /// Idle, and not an unbudgeted cacheable resource kept alive by its unique key.
    pub(crate) fn is_purgeable(&self) -> bool {
        self.is_idle() && !(self.budgeted_type == BudgetedType::UnbudgetedCacheable && self.unique_key.is_some())
    }

    /// Pending command buffer usages do not prevent scratch reuse.
    pub(crate) fn is_usable_as_scratch(&self) -> bool {
        self.scratch_key.is_some() && self.unique_key.is_none() && self.refs == 0 && self.is_budgeted()
    }

    /// Process the resource's bytes are attributed to.
    pub(crate) fn pid(&self) -> Option<u32> {
        (self.flags.contains(ResourceFlags::REAL_ALLOC) && self.tag.pid != 0).then_some(self.tag.pid)
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.shared.id()
    }
}

pub(crate) struct Records<R> {
    map: HashMap<ResourceId, Record<R>>,
}

impl<R> Default for Records<R> {
    fn default() -> Self {
        Self { map: HashMap::new() }
    }
}

impl<R> Records<R> {
    pub(crate) fn insert(&mut self, record: Record<R>)
    where
        R: GpuResource,
    {
        self.map.insert(record.id(), record);
    }

    pub(crate) fn remove(&mut self, id: ResourceId) -> Option<Record<R>> {
        self.map.remove(&id)
    }

    pub(crate) fn get(&self, id: ResourceId) -> Option<&Record<R>> {
        self.map.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ResourceId) -> Option<&mut Record<R>> {
        self.map.get_mut(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Record<R>> {
        self.map.values()
    }
}

impl<R> PositionStore for Records<R> {
    fn timestamp(&self, id: ResourceId) -> u32 {
        self.map.get(&id).map(|record| record.timestamp).unwrap_or_default()
    }

    fn set_position(&mut self, id: ResourceId, position: Position) {
        if let Some(record) = self.map.get_mut(&id) {
            record.position = position;
        }
    }
}

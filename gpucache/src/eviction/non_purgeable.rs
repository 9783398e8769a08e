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

use super::{Position, PositionStore};
use crate::resource::ResourceId;

/// Unordered list of resources that are referenced, in use by command buffers, or otherwise kept alive.
///
/// Removal swaps the last element into the freed slot and fixes its [`Position::NonPurgeable`] back-pointer.
#[derive(Debug, Default)]
pub(crate) struct NonPurgeableList {
    ids: Vec<ResourceId>,
}

impl NonPurgeableList {
    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.ids.iter().copied()
    }

    pub(crate) fn last(&self) -> Option<ResourceId> {
        self.ids.last().copied()
    }

    pub(crate) fn push(&mut self, id: ResourceId, store: &mut impl PositionStore) {
        self.ids.push(id);
        store.set_position(id, Position::NonPurgeable(self.ids.len() - 1));
    }

    pub(crate) fn remove(&mut self, index: usize, store: &mut impl PositionStore) -> ResourceId {
        let id = self.ids.swap_remove(index);
        store.set_position(id, Position::Detached);
        if let Some(moved) = self.ids.get(index) {
            store.set_position(*moved, Position::NonPurgeable(index));
        }
        id
    }

    pub(crate) fn sort_by_timestamp(&mut self, store: &mut impl PositionStore) {
        self.ids.sort_by_key(|id| (store.timestamp(*id), *id));
        for (index, id) in self.ids.iter().enumerate() {
            store.set_position(*id, Position::NonPurgeable(index));
        }
    }

    pub(crate) fn check(&self, position: impl Fn(ResourceId) -> Position) {
        for (index, id) in self.ids.iter().enumerate() {
            assert_eq!(position(*id), Position::NonPurgeable(index));
        }
    }
}

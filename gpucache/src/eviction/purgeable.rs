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

/// Array-backed binary min-heap of idle resources ordered by timestamp, least recently used first.
///
/// Every element knows its slot through [`Position::Purgeable`], which makes removal of an arbitrary element
/// `O(log n)`.
#[derive(Debug, Default)]
pub(crate) struct PurgeableQueue {
    heap: Vec<ResourceId>,
}

impl PurgeableQueue {
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.heap.iter().copied()
    }

    /// The least recently used resource.
    pub(crate) fn peek(&self) -> Option<ResourceId> {
        self.heap.first().copied()
    }

    pub(crate) fn insert(&mut self, id: ResourceId, store: &mut impl PositionStore) {
        self.heap.push(id);
        let index = self.heap.len() - 1;
        store.set_position(id, Position::Purgeable(index));
        self.sift_up(index, store);
    }

    #[cfg(test)]
    pub(crate) fn pop(&mut self, store: &mut impl PositionStore) -> Option<ResourceId> {
        if self.heap.is_empty() {
            return None;
        }
        Some(self.remove(0, store))
    }

    pub(crate) fn remove(&mut self, index: usize, store: &mut impl PositionStore) -> ResourceId {
        let id = self.heap.swap_remove(index);
        store.set_position(id, Position::Detached);
        if index < self.heap.len() {
            store.set_position(self.heap[index], Position::Purgeable(index));
            if !self.sift_up(index, store) {
                self.sift_down(index, store);
            }
        }
        id
    }

    /// Resources ordered from least to most recently used.
    pub(crate) fn sorted(&self, store: &impl PositionStore) -> Vec<ResourceId> {
        let mut ids = self.heap.clone();
        ids.sort_by_key(|id| (store.timestamp(*id), *id));
        ids
    }

    /// Empty the queue, returning resources ordered from least to most recently used.
    pub(crate) fn drain_sorted(&mut self, store: &mut impl PositionStore) -> Vec<ResourceId> {
        let ids = self.sorted(store);
        for id in self.heap.drain(..) {
            store.set_position(id, Position::Detached);
        }
        ids
    }

    /// Verify the heap property and all back-pointers.
    pub(crate) fn check(&self, store: &impl PositionStore, position: impl Fn(ResourceId) -> Position) {
        for (index, id) in self.heap.iter().enumerate() {
            assert_eq!(position(*id), Position::Purgeable(index));
            if index > 0 {
                let parent = (index - 1) / 2;
                assert!(!Self::less(store, *id, self.heap[parent]));
            }
        }
    }

    fn less(store: &impl PositionStore, a: ResourceId, b: ResourceId) -> bool {
        (store.timestamp(a), a) < (store.timestamp(b), b)
    }

    fn swap(&mut self, a: usize, b: usize, store: &mut impl PositionStore) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        store.set_position(self.heap[a], Position::Purgeable(a));
        store.set_position(self.heap[b], Position::Purgeable(b));
    }

    /// Return `true` if the element moved.
    fn sift_up(&mut self, mut index: usize, store: &mut impl PositionStore) -> bool {
        let origin = index;
        while index > 0 {
            let parent = (index - 1) / 2;
            if !Self::less(store, self.heap[index], self.heap[parent]) {
                break;
            }
            self.swap(index, parent, store);
            index = parent;
        }
        index != origin
    }

    fn sift_down(&mut self, mut index: usize, store: &mut impl PositionStore) {
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < self.heap.len() && Self::less(store, self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap.len() && Self::less(store, self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(index, smallest, store);
            index = smallest;
        }
    }
}

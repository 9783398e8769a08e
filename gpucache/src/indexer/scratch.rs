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

use hashbrown::HashMap;

use crate::{key::ScratchKey, resource::ResourceId};

/// Multimap from scratch key to the resources currently available for reuse under that key.
#[derive(Debug, Default)]
pub(crate) struct ScratchIndex {
    map: HashMap<ScratchKey, Vec<ResourceId>>,
    len: usize,
}

impl ScratchIndex {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, key: ScratchKey, id: ResourceId) {
        let ids = self.map.entry(key).or_default();
        if !ids.contains(&id) {
            ids.push(id);
            self.len += 1;
        }
    }

    /// Return `true` if the pair was present.
    pub(crate) fn remove(&mut self, key: &ScratchKey, id: ResourceId) -> bool {
        let Some(ids) = self.map.get_mut(key) else {
            return false;
        };
        let Some(index) = ids.iter().position(|i| *i == id) else {
            return false;
        };
        ids.swap_remove(index);
        if ids.is_empty() {
            self.map.remove(key);
        }
        self.len -= 1;
        true
    }

    /// Any resource registered under `key`.
    pub(crate) fn find(&self, key: &ScratchKey) -> Option<ResourceId> {
        self.map.get(key).and_then(|ids| ids.last().copied())
    }

    pub(crate) fn contains(&self, key: &ScratchKey, id: ResourceId) -> bool {
        self.map.get(key).is_some_and(|ids| ids.contains(&id))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&ScratchKey, ResourceId)> {
        self.map.iter().flat_map(|(key, ids)| ids.iter().map(move |id| (key, *id)))
    }
}

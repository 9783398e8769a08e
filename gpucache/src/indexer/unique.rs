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

use crate::{key::UniqueKey, resource::ResourceId};

/// One-to-one map from unique key to the resource holding it.
#[derive(Debug, Default)]
pub(crate) struct UniqueIndex {
    map: HashMap<UniqueKey, ResourceId>,
}

impl UniqueIndex {
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    /// Return the previous holder of the key, if any.
    pub(crate) fn insert(&mut self, key: UniqueKey, id: ResourceId) -> Option<ResourceId> {
        self.map.insert(key, id)
    }

    /// Remove `key` only if `id` holds it.
    pub(crate) fn remove(&mut self, key: &UniqueKey, id: ResourceId) -> bool {
        if self.map.get(key) != Some(&id) {
            return false;
        }
        self.map.remove(key);
        true
    }

    pub(crate) fn get(&self, key: &UniqueKey) -> Option<ResourceId> {
        self.map.get(key).copied()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&UniqueKey, ResourceId)> {
        self.map.iter().map(|(key, id)| (key, *id))
    }
}

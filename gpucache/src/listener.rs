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

use crate::key::UniqueKey;

/// Invoked with `(pid, bytes)` when a process's attributed bytes first exceed the configured ceiling.
pub type OverflowCallback = Arc<dyn Fn(u32, usize) + Send + Sync + 'static>;

/// A thread-safe cache layered above the resource cache that may pin resources with its own references.
pub trait SecondaryCache: Send + Sync + 'static {
    /// Drop every reference the secondary cache is the only holder of.
    fn drop_unique_refs(&self);

    /// Drop every reference.
    fn drop_all_refs(&self) {
        self.drop_unique_refs()
    }
}

/// The layer that maps unique keys to resources above the cache, told when a key is invalidated or released.
pub trait KeyInvalidationListener: Send + Sync + 'static {
    /// `key` no longer names a cached resource.
    fn on_unique_key_invalidated(&self, key: &UniqueKey);
}

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

//! Utilities for testing code built on the resource cache.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    key::UniqueKey,
    listener::{KeyInvalidationListener, SecondaryCache},
    resource::{GpuResource, ResourceRef},
};

/// Lifecycle counters shared by [`MockResource`]s.
#[derive(Debug, Default)]
pub struct MockCounters {
    released: AtomicUsize,
    abandoned: AtomicUsize,
}

impl MockCounters {
    /// Resources released so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Resources abandoned so far.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::Relaxed)
    }
}

/// A fake GPU object of a fixed size.
#[derive(Debug, Clone)]
pub struct MockResource {
    size: usize,
    counters: Arc<MockCounters>,
}

impl MockResource {
    /// Create a resource with its own counters.
    pub fn new(size: usize) -> Self {
        Self::with_counters(size, Arc::default())
    }

    /// Create a resource reporting to shared counters.
    pub fn with_counters(size: usize, counters: Arc<MockCounters>) -> Self {
        Self { size, counters }
    }

    /// Counters of the resource.
    pub fn counters(&self) -> &Arc<MockCounters> {
        &self.counters
    }
}

impl GpuResource for MockResource {
    fn gpu_memory_size(&self) -> usize {
        self.size
    }

    fn on_release(&self) {
        self.counters.released.fetch_add(1, Ordering::Relaxed);
    }

    fn on_abandon(&self) {
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
    }
}

/// A secondary cache that pins resources until asked to drop them.
pub struct MockSecondaryCache<R>
where
    R: GpuResource,
{
    refs: Mutex<Vec<ResourceRef<R>>>,
}

impl<R> Default for MockSecondaryCache<R>
where
    R: GpuResource,
{
    fn default() -> Self {
        Self { refs: Mutex::new(vec![]) }
    }
}

impl<R> MockSecondaryCache<R>
where
    R: GpuResource,
{
    /// Pin a resource.
    pub fn hold(&self, resource: ResourceRef<R>) {
        self.refs.lock().push(resource);
    }

    /// Count of pinned resources.
    pub fn len(&self) -> usize {
        self.refs.lock().len()
    }

    /// Return `true` if nothing is pinned.
    pub fn is_empty(&self) -> bool {
        self.refs.lock().is_empty()
    }
}

impl<R> SecondaryCache for MockSecondaryCache<R>
where
    R: GpuResource,
{
    fn drop_unique_refs(&self) {
        self.refs.lock().clear();
    }
}

/// Records every invalidated unique key.
#[derive(Debug, Default)]
pub struct RecordingListener {
    keys: Mutex<Vec<UniqueKey>>,
}

impl RecordingListener {
    /// Keys invalidated so far.
    pub fn keys(&self) -> Vec<UniqueKey> {
        self.keys.lock().clone()
    }
}

impl KeyInvalidationListener for RecordingListener {
    fn on_unique_key_invalidated(&self, key: &UniqueKey) {
        self.keys.lock().push(key.clone());
    }
}

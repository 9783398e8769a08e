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

use std::{
    fmt::Debug,
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{key::ScratchKey, mailbox::Mailbox};

/// A GPU object whose lifetime is managed by the resource cache.
pub trait GpuResource: Send + Sync + 'static {
    /// Size of the GPU memory backing the object, in bytes.
    ///
    /// Sampled once when the resource is inserted into the cache.
    fn gpu_memory_size(&self) -> usize;

    /// Called once when the cache frees the object while the GPU context is alive.
    fn on_release(&self) {}

    /// Called once when the cache drops the object after the GPU context was lost.
    fn on_abandon(&self) {}
}

/// Identity of a cached resource, unique within its [`CacheContext`](crate::CacheContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

/// How a resource counts against the cache budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BudgetedType {
    /// Counted against the budget.
    #[default]
    Budgeted,
    /// Not counted, and freed as soon as it becomes idle.
    UnbudgetedUncacheable,
    /// Not counted, but kept while idle if it holds a unique key.
    UnbudgetedCacheable,
}

bitflags! {
    /// Extra attributes of a resource.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct ResourceFlags: u8 {
        /// The resource owns a real GPU allocation and is attributed to the pid of its tag.
        const REAL_ALLOC = 0b01;
        /// The resource wraps an externally created object.
        const WRAPPED = 0b10;
    }
}

/// Attribution tag of a resource.
///
/// Used as a filter, every zero or empty field is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceTag {
    /// Process id.
    pub pid: u32,
    /// Thread id.
    pub tid: u32,
    /// Window id.
    pub wid: u64,
    /// Function id.
    pub fid: u32,
    /// Free-form name.
    pub name: String,
}

impl ResourceTag {
    /// Create a tag.
    pub fn new(pid: u32, tid: u32, wid: u64, fid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            tid,
            wid,
            fid,
            name: name.into(),
        }
    }

    /// Return `true` if every field of the tag is a wildcard.
    pub fn is_empty(&self) -> bool {
        self.pid == 0 && self.tid == 0 && self.wid == 0 && self.fid == 0 && self.name.is_empty()
    }

    /// Return `true` if `tag` matches `self` used as a filter.
    ///
    /// An empty filter matches only empty tags.
    pub fn filter(&self, tag: &ResourceTag) -> bool {
        if self.is_empty() {
            return tag.is_empty();
        }
        (self.pid == 0 || self.pid == tag.pid)
            && (self.tid == 0 || self.tid == tag.tid)
            && (self.wid == 0 || self.wid == tag.wid)
            && (self.fid == 0 || self.fid == tag.fid)
            && (self.name.is_empty() || self.name == tag.name)
    }
}

/// Insertion attributes of a resource.
#[derive(Debug, Clone, Default)]
pub struct ResourceDesc {
    pub(crate) budgeted_type: BudgetedType,
    pub(crate) scratch_key: Option<ScratchKey>,
    pub(crate) tag: Option<ResourceTag>,
    pub(crate) flags: ResourceFlags,
}

impl ResourceDesc {
    /// Budgeted resource with no key and no tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the budgeted type.
    pub fn with_budgeted_type(mut self, budgeted_type: BudgetedType) -> Self {
        self.budgeted_type = budgeted_type;
        self
    }

    /// Set the scratch key. Invalid keys are ignored.
    pub fn with_scratch_key(mut self, key: ScratchKey) -> Self {
        self.scratch_key = key.is_valid().then_some(key);
        self
    }

    /// Set the tag explicitly instead of inheriting the cache's current tag.
    pub fn with_tag(mut self, tag: ResourceTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Set the flags.
    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

pub(crate) struct Shared<R> {
    id: ResourceId,
    object: R,
    destroyed: AtomicBool,
}

impl<R> Shared<R> {
    pub(crate) fn new(id: ResourceId, object: R) -> Self {
        Self {
            id,
            object,
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn object(&self) -> &R {
        &self.object
    }

    pub(crate) fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::Release);
    }
}

/// An external reference to a cached resource.
///
/// Holding a [`ResourceRef`] keeps the resource non-purgeable. Dropping it posts the reference back to the owning
/// cache through its [`Mailbox`], which is safe from any thread; the cache applies it on its next
/// [`process_returned`](crate::ResourceCache::process_returned) or purge. On the owning thread,
/// [`ResourceCache::unref`](crate::ResourceCache::unref) gives the reference back immediately.
///
/// The object stays readable after the cache frees it, check [`ResourceRef::is_destroyed`].
pub struct ResourceRef<R>
where
    R: GpuResource,
{
    shared: Arc<Shared<R>>,
    mailbox: Mailbox,
    detached: bool,
}

impl<R> Debug for ResourceRef<R>
where
    R: GpuResource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRef")
            .field("id", &self.shared.id)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl<R> ResourceRef<R>
where
    R: GpuResource,
{
    pub(crate) fn new(shared: Arc<Shared<R>>, mailbox: Mailbox) -> Self {
        Self {
            shared,
            mailbox,
            detached: false,
        }
    }

    /// Identity of the referenced resource.
    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    /// Return `true` if the cache has already released or abandoned the resource.
    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    pub(crate) fn shared(&self) -> &Arc<Shared<R>> {
        &self.shared
    }

    /// Consume the reference without posting it back.
    pub(crate) fn detach(mut self) -> ResourceId {
        self.detached = true;
        self.shared.id
    }
}

impl<R> Deref for ResourceRef<R>
where
    R: GpuResource,
{
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.shared.object()
    }
}

impl<R> Drop for ResourceRef<R>
where
    R: GpuResource,
{
    fn drop(&mut self) {
        if !self.detached {
            self.mailbox.return_ref(self.shared.id);
        }
    }
}

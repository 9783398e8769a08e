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

use gpucache_common::{
    error::{Error, Result},
    metrics::model::Metrics,
    strict_assert, strict_assert_eq,
};
#[cfg(debug_assertions)]
use gpucache_common::owner::SingleOwner;
use hashbrown::HashMap;
use itertools::Itertools;

use crate::{
    budget::Budget,
    config::ResourceCacheConfig,
    context::CacheContext,
    eviction::{NonPurgeableList, Position, PositionStore, PurgeableQueue},
    frame::FramePolicy,
    indexer::{ScratchIndex, UniqueIndex},
    key::{ScratchKey, UniqueKey},
    listener::{KeyInvalidationListener, OverflowCallback, SecondaryCache},
    mailbox::{mailbox, Inbox, Mailbox, Return},
    record::{Record, Records},
    resource::{BudgetedType, GpuResource, ResourceDesc, ResourceFlags, ResourceId, ResourceRef, ResourceTag, Shared},
    stats::CacheStatistics,
};

macro_rules! single_owner {
    ($self:ident) => {
        #[cfg(debug_assertions)]
        let _guard = $self.owner.enter();
    };
}

/// A budgeted cache owning the lifetime of GPU resources.
///
/// Resources are indexed by an optional [`ScratchKey`] for reuse of interchangeable allocations and by an optional
/// [`UniqueKey`] for lookup of one specific artifact. Idle resources wait in a least-recently-used queue and are
/// evicted while the budgeted bytes exceed the limit.
///
/// The cache is owned by one thread. Other threads interact with it only through its [`Mailbox`], whose messages are
/// applied when the owner purges or calls [`ResourceCache::process_returned`].
pub struct ResourceCache<R>
where
    R: GpuResource,
{
    config: ResourceCacheConfig,
    context: Arc<CacheContext>,

    records: Records<R>,
    purgeable: PurgeableQueue,
    non_purgeable: NonPurgeableList,
    scratch: ScratchIndex,
    unique: UniqueIndex,

    budget: Budget,
    frame: FramePolicy,
    timestamp: u32,
    tags: Vec<ResourceTag>,

    mailbox: Mailbox,
    inbox: Inbox,

    secondary: Option<Arc<dyn SecondaryCache>>,
    listener: Option<Arc<dyn KeyInvalidationListener>>,

    metrics: Arc<Metrics>,

    #[cfg(debug_assertions)]
    owner: SingleOwner,
}

impl<R> ResourceCache<R>
where
    R: GpuResource,
{
    pub(crate) fn new(
        config: ResourceCacheConfig,
        context: Arc<CacheContext>,
        metrics: Arc<Metrics>,
        overflow: Option<OverflowCallback>,
        secondary: Option<Arc<dyn SecondaryCache>>,
        listener: Option<Arc<dyn KeyInvalidationListener>>,
    ) -> Self {
        let mut budget = Budget::new(config.max_bytes, config.soft_limit_ratio, metrics.clone());
        budget.set_pid_limit(config.pid_memory_limit, overflow);
        let frame = FramePolicy::new(config.frame.clone());
        let (mailbox, inbox) = mailbox();

        Self {
            config,
            context,
            records: Records::default(),
            purgeable: PurgeableQueue::default(),
            non_purgeable: NonPurgeableList::default(),
            scratch: ScratchIndex::default(),
            unique: UniqueIndex::default(),
            budget,
            frame,
            timestamp: 0,
            tags: vec![],
            mailbox,
            inbox,
            secondary,
            listener,
            metrics,
            #[cfg(debug_assertions)]
            owner: SingleOwner::default(),
        }
    }

    /// Current config.
    pub fn config(&self) -> &ResourceCacheConfig {
        &self.config
    }

    /// Identity generators of the GPU context the cache belongs to.
    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    /// Handle for posting messages to the cache from any thread.
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    /// Budget ceiling in bytes.
    pub fn max_bytes(&self) -> usize {
        self.budget.max_bytes()
    }

    /// Bytes of all tracked resources.
    pub fn bytes(&self) -> usize {
        self.budget.bytes()
    }

    /// Bytes of budgeted resources.
    pub fn budgeted_bytes(&self) -> usize {
        self.budget.budgeted_bytes()
    }

    /// Bytes of resources in the purgeable queue.
    pub fn purgeable_bytes(&self) -> usize {
        self.budget.purgeable_bytes()
    }

    /// Count of tracked resources.
    pub fn resource_count(&self) -> usize {
        self.budget.count()
    }

    /// Count of budgeted resources.
    pub fn budgeted_resource_count(&self) -> usize {
        self.budget.budgeted_count()
    }

    /// Count of resources in the purgeable queue.
    pub fn purgeable_count(&self) -> usize {
        self.purgeable.len()
    }

    /// Bytes attributed to `pid`.
    pub fn bytes_of_pid(&self, pid: u32) -> usize {
        self.budget.pid_bytes(pid)
    }

    /// Return `true` if the resource is tracked by the cache.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.records.get(id).is_some()
    }

    /// Return `true` if the resource waits in the purgeable queue.
    pub fn is_purgeable(&self, id: ResourceId) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| matches!(record.position, Position::Purgeable(_)))
    }

    /// Budgeted type of a tracked resource.
    pub fn budgeted_type(&self, id: ResourceId) -> Option<BudgetedType> {
        self.records.get(id).map(|record| record.budgeted_type)
    }

    /// Unique key of a tracked resource.
    pub fn unique_key(&self, id: ResourceId) -> Option<&UniqueKey> {
        self.records.get(id).and_then(|record| record.unique_key.as_ref())
    }

    /// Scratch key of a tracked resource.
    pub fn scratch_key(&self, id: ResourceId) -> Option<&ScratchKey> {
        self.records.get(id).and_then(|record| record.scratch_key.as_ref())
    }

    /// Tag of a tracked resource.
    pub fn resource_tag(&self, id: ResourceId) -> Option<&ResourceTag> {
        self.records.get(id).map(|record| &record.tag)
    }

    /// Insert a newly created resource and return the first reference to it.
    ///
    /// The resource is attributed to the tag of `desc`, or else to the current resource tag.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "gpucache::resource_cache::insert"))]
    pub fn insert(&mut self, object: R, desc: ResourceDesc) -> ResourceRef<R> {
        single_owner!(self);

        let id = self.context.next_resource_id();
        let size = object.gpu_memory_size();
        let tag = desc
            .tag
            .or_else(|| self.tags.last().cloned())
            .unwrap_or_default();
        let shared = Arc::new(Shared::new(id, object));
        let mut record = Record::new(shared.clone(), size, desc.budgeted_type, desc.scratch_key, tag, desc.flags);

        // Renumbering on wraparound must not see the resource being inserted.
        record.timestamp = self.next_timestamp();
        let budgeted = record.is_budgeted();
        let pid = record.pid();
        self.records.insert(record);
        self.non_purgeable.push(id, &mut self.records);
        self.budget.on_insert(size, budgeted, pid);
        self.metrics.resource_insert.increase(1);

        tracing::trace!("[resource cache]: insert {id:?}, size: {size}, budgeted: {budgeted}, pid: {pid:?}");

        self.purge_as_needed();
        ResourceRef::new(shared, self.mailbox.clone())
    }

    /// Take another reference to a resource without touching its recency.
    pub fn ref_resource(&mut self, resource: &ResourceRef<R>) -> ResourceRef<R> {
        single_owner!(self);

        if let Some(record) = self.records.get_mut(resource.id()) {
            record.refs += 1;
        }
        ResourceRef::new(resource.shared().clone(), self.mailbox.clone())
    }

    /// Give a reference back immediately.
    pub fn unref(&mut self, resource: ResourceRef<R>) {
        single_owner!(self);

        let id = resource.detach();
        self.unref_by_id(id);
    }

    /// Mark the resource as used by a command buffer. Paired with
    /// [`ResourceCache::remove_command_buffer_usage`] or [`Mailbox::return_command_buffer_usage`].
    pub fn add_command_buffer_usage(&mut self, id: ResourceId) {
        single_owner!(self);

        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        record.command_buffer_usages += 1;
        self.reconcile(id);
    }

    /// Give back a command buffer usage.
    pub fn remove_command_buffer_usage(&mut self, id: ResourceId) {
        single_owner!(self);

        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        strict_assert!(record.command_buffer_usages > 0);
        if record.command_buffer_usages == 0 {
            return;
        }
        record.command_buffer_usages -= 1;
        if record.command_buffer_usages == 0 {
            self.on_ref_zero(id, false);
        }
    }

    /// Find a resource available for reuse under `key`, reference it and make it the most recently used.
    ///
    /// The resource leaves the scratch index while it is referenced.
    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "gpucache::resource_cache::find_and_ref_scratch_resource")
    )]
    pub fn find_and_ref_scratch_resource(&mut self, key: &ScratchKey) -> Option<ResourceRef<R>> {
        single_owner!(self);

        let Some(id) = self.scratch.find(key) else {
            self.metrics.resource_scratch_miss.increase(1);
            return None;
        };
        self.metrics.resource_scratch_hit.increase(1);
        self.scratch.remove(key, id);
        self.ref_and_make_resource_mru(id);
        self.make_ref(id)
    }

    /// Find the resource holding `key`, reference it and make it the most recently used.
    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "gpucache::resource_cache::find_and_ref_unique_resource")
    )]
    pub fn find_and_ref_unique_resource(&mut self, key: &UniqueKey) -> Option<ResourceRef<R>> {
        single_owner!(self);

        let Some(id) = self.unique.get(key) else {
            self.metrics.resource_unique_miss.increase(1);
            return None;
        };
        self.metrics.resource_unique_hit.increase(1);
        self.ref_and_make_resource_mru(id);
        self.make_ref(id)
    }

    /// Return `true` if some resource holds `key`.
    pub fn has_unique_key(&self, key: &UniqueKey) -> bool {
        self.unique.get(key).is_some()
    }

    /// Give `key` to the resource.
    ///
    /// A previous holder of `key` is freed if it is idle and has no scratch key, otherwise it loses the key. An
    /// invalid `key` removes the resource's unique key.
    pub fn change_unique_key(&mut self, id: ResourceId, key: UniqueKey) {
        single_owner!(self);

        if !key.is_valid() {
            self.remove_unique_key_inner(id);
            return;
        }
        if !self.contains(id) {
            return;
        }

        if let Some(old) = self.unique.get(&key) {
            if old == id {
                return;
            }
            let free_old = self
                .records
                .get(old)
                .is_some_and(|record| record.scratch_key.is_none() && matches!(record.position, Position::Purgeable(_)));
            if free_old {
                tracing::trace!("[resource cache]: free previous holder {old:?} of {key:?}");
                self.destroy(old, false);
            } else {
                self.remove_unique_key_inner(old);
            }
        }
        strict_assert!(self.unique.get(&key).is_none());

        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        if let Some(old_key) = record.unique_key.take() {
            self.unique.remove(&old_key, id);
        } else if record.is_usable_as_scratch() {
            if let Some(scratch_key) = record.scratch_key.as_ref() {
                self.scratch.remove(scratch_key, id);
            }
        }
        record.unique_key = Some(key.clone());
        self.unique.insert(key, id);

        self.reconcile(id);
    }

    /// Remove the resource's unique key. The resource becomes available for scratch reuse if it qualifies.
    pub fn remove_unique_key(&mut self, id: ResourceId) {
        single_owner!(self);

        self.remove_unique_key_inner(id);
    }

    /// Permanently remove the resource's scratch key.
    pub fn remove_scratch_key(&mut self, id: ResourceId) {
        single_owner!(self);

        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        if let Some(key) = record.scratch_key.take() {
            self.scratch.remove(&key, id);
        }
    }

    /// Change how the resource counts against the budget.
    ///
    /// Wrapped resources cannot become budgeted and uniquely keyed budgeted resources cannot become unbudgeted.
    /// Return `true` if the budgeted type changed.
    pub fn set_budgeted_type(&mut self, id: ResourceId, budgeted_type: BudgetedType) -> bool {
        single_owner!(self);

        let Some(record) = self.records.get(id) else {
            return false;
        };
        if record.budgeted_type == budgeted_type {
            return false;
        }
        let refused = match budgeted_type {
            BudgetedType::Budgeted => record.flags.contains(ResourceFlags::WRAPPED),
            _ => record.is_budgeted() && record.unique_key.is_some(),
        };
        if refused {
            tracing::trace!(
                "[resource cache]: refuse budgeted type change of {id:?} from {:?} to {budgeted_type:?}",
                record.budgeted_type
            );
            return false;
        }
        self.set_budgeted_type_inner(id, budgeted_type);
        true
    }

    /// Free a resource now, running its release hook, whether it is referenced or not.
    ///
    /// Outstanding references observe [`ResourceRef::is_destroyed`].
    pub fn release_resource(&mut self, id: ResourceId) -> bool {
        single_owner!(self);

        self.destroy(id, false)
    }

    /// Drop a resource now, running its abandon hook, whether it is referenced or not.
    pub fn abandon_resource(&mut self, id: ResourceId) -> bool {
        single_owner!(self);

        self.destroy(id, true)
    }

    /// Apply references and command buffer usages returned through the mailbox.
    pub fn process_returned(&mut self) {
        single_owner!(self);

        for ret in self.inbox.drain_returns() {
            match ret {
                Return::Ref(id) => {
                    self.metrics.resource_return.increase(1);
                    self.unref_by_id(id);
                }
                Return::CommandBufferUsage(id) => self.remove_command_buffer_usage(id),
            }
        }
    }

    /// Drain the mailbox, then evict least recently used resources while over budget.
    pub fn purge_as_needed(&mut self) {
        self.purge_as_needed_with(None);
    }

    /// Like [`ResourceCache::purge_as_needed`], with a predicate reporting that the next frame has already arrived.
    ///
    /// While the predicate holds, the soft limit applies and mid-frame deferral is lifted.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "gpucache::resource_cache::purge_as_needed"))]
    pub fn purge_as_needed_with(&mut self, next_frame_arrived: Option<&dyn Fn() -> bool>) {
        single_owner!(self);

        self.process_invalidations();
        self.process_returned();

        let arrived = next_frame_arrived.is_some_and(|f| f());
        let over_by = self.budget.budgeted_bytes().saturating_sub(self.budget.max_bytes());
        if self.frame.should_defer(over_by, Some(&|| arrived)) {
            tracing::trace!(
                "[resource cache]: defer purge within frame {}, over by {over_by} bytes",
                self.frame.frame_count()
            );
            return;
        }

        self.purge_over_budget(arrived);
    }

    /// Return `true` if purging is allowed in the current frame phase.
    pub fn allow_to_purge(&self, next_frame_arrived: Option<&dyn Fn() -> bool>) -> bool {
        self.frame.allow_to_purge(next_frame_arrived)
    }

    /// Mark the beginning of a frame.
    pub fn begin_frame(&mut self) {
        single_owner!(self);

        self.frame.begin_frame();
    }

    /// Mark the end of the current frame.
    pub fn end_frame(&mut self) {
        single_owner!(self);

        self.frame.end_frame();
    }

    /// Count of frames begun so far.
    pub fn frame_count(&self) -> u64 {
        self.frame.frame_count()
    }

    /// Evict every purgeable resource, or only those without a unique key if `scratch_only`.
    ///
    /// Unless `scratch_only`, the secondary cache is first asked to drop its unique references.
    pub fn purge_unlocked_resources(&mut self, scratch_only: bool) {
        single_owner!(self);

        self.process_returned();
        if !scratch_only {
            if let Some(secondary) = self.secondary.clone() {
                secondary.drop_unique_refs();
                self.process_returned();
            }
        }
        self.purge_unlocked_matching(scratch_only, |_| true);
    }

    /// Evict purgeable resources that became purgeable before `since`.
    pub fn purge_resources_not_used_since(&mut self, since: Instant, scratch_only: bool) {
        single_owner!(self);

        self.process_returned();
        self.purge_unlocked_matching(scratch_only, |record| {
            record.purgeable_since.is_some_and(|t| t < since)
        });
    }

    /// Evict purgeable resources whose tag matches `filter`.
    pub fn purge_unlocked_resources_by_tag(&mut self, scratch_only: bool, filter: impl Fn(&ResourceTag) -> bool) {
        single_owner!(self);

        self.process_returned();
        self.purge_unlocked_matching(scratch_only, |record| filter(&record.tag));
    }

    /// Evict purgeable resources attributed to one of `pids`.
    pub fn purge_unlocked_resources_by_pid(&mut self, scratch_only: bool, pids: &[u32]) {
        self.purge_unlocked_resources_by_tag(scratch_only, |tag| pids.contains(&tag.pid));
    }

    /// Try to free `bytes_to_purge` bytes.
    ///
    /// With `prefer_scratch`, resources without a unique key go first in least recently used order. The rest is freed
    /// by least recently used eviction against a temporarily lowered limit.
    pub fn purge_unlocked_bytes(&mut self, bytes_to_purge: usize, prefer_scratch: bool) {
        single_owner!(self);

        self.process_returned();

        let target = self.budget.bytes().saturating_sub(bytes_to_purge);
        let mut still_over = target < self.budget.bytes();

        if prefer_scratch && bytes_to_purge < self.budget.purgeable_bytes() {
            let mut scratch_bytes = 0;
            let mut victims = vec![];
            for id in self.purgeable.sorted(&self.records) {
                if !still_over {
                    break;
                }
                let Some(record) = self.records.get(id) else {
                    continue;
                };
                if record.unique_key.is_none() {
                    scratch_bytes += record.size;
                    victims.push(id);
                    still_over = target < self.budget.bytes() - scratch_bytes;
                }
            }
            for id in victims {
                self.evict(id);
            }
            still_over = target < self.budget.bytes();
        }

        if still_over {
            let max_bytes = self.budget.max_bytes();
            self.budget.set_limit(target);
            self.purge_over_budget(false);
            self.budget.set_limit(max_bytes);
        }
    }

    /// Free just enough least recently used resources for `bytes` more budgeted bytes to fit.
    ///
    /// Return `false` without evicting anything if that is impossible.
    pub fn purge_to_make_headroom(&mut self, bytes: usize) -> bool {
        single_owner!(self);

        if bytes == 0 {
            return true;
        }
        if bytes > self.budget.max_bytes() {
            return false;
        }
        if self.budget.would_fit(bytes) {
            return true;
        }

        let sorted = self.purgeable.sorted(&self.records);
        let mut projected = self.budget.budgeted_bytes();
        let mut count = None;
        for (i, id) in sorted.iter().enumerate() {
            if let Some(record) = self.records.get(*id) {
                if record.is_budgeted() {
                    projected -= record.size;
                }
            }
            if projected <= self.budget.max_bytes() - bytes {
                count = Some(i + 1);
                break;
            }
        }
        let Some(count) = count else {
            return false;
        };
        for id in sorted.into_iter().take(count) {
            self.evict(id);
        }
        true
    }

    /// Free every resource whose tag matches `filter`, referenced or not.
    pub fn release_by_tag(&mut self, filter: impl Fn(&ResourceTag) -> bool) {
        single_owner!(self);

        self.process_returned();
        let victims = self
            .non_purgeable
            .iter()
            .chain(self.purgeable.iter())
            .filter(|id| self.records.get(*id).is_some_and(|record| filter(&record.tag)))
            .collect_vec();
        tracing::debug!("[resource cache]: release {} resources by tag", victims.len());
        for id in victims {
            let key = self.records.get(id).and_then(|record| record.unique_key.clone());
            if let (Some(key), Some(listener)) = (key, self.listener.as_ref()) {
                listener.on_unique_key_invalidated(&key);
            }
            self.destroy(id, false);
        }
    }

    /// Free every resource attributed to one of `pids`, referenced or not.
    pub fn release_by_pid(&mut self, pids: &[u32]) {
        self.release_by_tag(|tag| pids.contains(&tag.pid));
    }

    /// Return `true` if `bytes` more budgeted bytes fit without eviction.
    pub fn would_fit(&self, bytes: usize) -> bool {
        self.budget.would_fit(bytes)
    }

    /// Return `true` if the budgeted bytes exceed the limit.
    pub fn over_budget(&self) -> bool {
        self.budget.over_budget(false)
    }

    /// Return `true` if the budgeted bytes exceed the soft limit when `contention` holds, or the limit otherwise.
    pub fn over_budget_with(&self, contention: &dyn Fn() -> bool) -> bool {
        self.budget.over_budget(contention())
    }

    /// Return `true` if flushing pending command buffers is the only way left to get under budget.
    pub fn requests_flush(&self) -> bool {
        self.budget.over_budget(false)
            && self.purgeable.is_empty()
            && self.non_purgeable.iter().any(|id| {
                self.records.get(id).is_some_and(|record| {
                    record.is_budgeted() && record.refs == 0 && record.command_buffer_usages > 0
                })
            })
    }

    /// Change the budget ceiling and purge.
    pub fn set_limit(&mut self, max_bytes: usize) {
        single_owner!(self);

        tracing::debug!("[resource cache]: set limit to {max_bytes} bytes");
        self.config.max_bytes = max_bytes;
        self.budget.set_limit(max_bytes);
        self.purge_as_needed();
    }

    /// Apply a new config and purge.
    ///
    /// The metric label keeps the name the cache was built with.
    pub fn update_config(&mut self, config: ResourceCacheConfig) -> Result<()> {
        single_owner!(self);

        config.validate()?;
        self.budget.set_limit(config.max_bytes);
        self.budget.set_soft_limit_ratio(config.soft_limit_ratio);
        self.budget.set_pid_limit(config.pid_memory_limit, None);
        self.frame.set_config(config.frame.clone());
        self.config = ResourceCacheConfig {
            name: self.config.name.clone(),
            ..config
        };
        self.purge_as_needed();
        Ok(())
    }

    /// Install the per-process overflow callback fired when a pid's bytes exceed `threshold`.
    pub fn init_gpu_memory_limit(
        &mut self,
        threshold: usize,
        callback: impl Fn(u32, usize) + Send + Sync + 'static,
    ) -> Result<()> {
        single_owner!(self);

        if threshold == 0 {
            return Err(Error::invalid_config("pid_memory_limit", "> 0", threshold));
        }
        self.config.pid_memory_limit = Some(threshold);
        self.budget.set_pid_limit(Some(threshold), Some(Arc::new(callback)));
        Ok(())
    }

    /// Return `true` if `pid` has been reported over the per-process ceiling and has not dropped to zero since.
    pub fn is_pid_over_limit(&self, pid: u32) -> bool {
        self.budget.is_notified(pid)
    }

    /// Attribute resources inserted from now on to `tag`.
    pub fn push_resource_tag(&mut self, tag: ResourceTag) {
        single_owner!(self);

        self.tags.push(tag);
    }

    /// Restore the previous resource tag.
    pub fn pop_resource_tag(&mut self) -> Option<ResourceTag> {
        single_owner!(self);

        self.tags.pop()
    }

    /// Tag newly inserted resources are attributed to.
    pub fn current_resource_tag(&self) -> Option<&ResourceTag> {
        self.tags.last()
    }

    /// Free every resource, running release hooks.
    pub fn release_all(&mut self) {
        self.destroy_all(false);
    }

    /// Drop every resource after the GPU context was lost, running abandon hooks.
    pub fn abandon_all(&mut self) {
        self.destroy_all(true);
    }

    /// Snapshot of the cache.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            resource_count: self.budget.count(),
            budgeted_count: self.budget.budgeted_count(),
            purgeable_count: self.purgeable.len(),
            scratch_count: self.scratch.len(),
            unique_count: self.unique.len(),
            bytes: self.budget.bytes(),
            budgeted_bytes: self.budget.budgeted_bytes(),
            purgeable_bytes: self.budget.purgeable_bytes(),
            max_bytes: self.budget.max_bytes(),
            bytes_by_pid: self.budget.pids().sorted().collect(),
        }
    }

    /// Recompute every aggregate from the tracked resources and check all invariants.
    ///
    /// # Panics
    ///
    /// Panics on the first violated invariant.
    pub fn validate(&self) {
        let mut bytes = 0;
        let mut budgeted_bytes = 0;
        let mut budgeted_count = 0;
        let mut purgeable_bytes = 0;
        let mut pid_bytes: HashMap<u32, usize> = HashMap::new();

        for record in self.records.values() {
            let id = record.id();
            bytes += record.size;
            if record.is_budgeted() {
                budgeted_bytes += record.size;
                budgeted_count += 1;
            }
            if let Some(pid) = record.pid() {
                *pid_bytes.entry(pid).or_default() += record.size;
            }

            match record.position {
                Position::Purgeable(_) => {
                    assert!(record.is_purgeable(), "{id:?} is queued but not purgeable");
                    assert!(record.purgeable_since.is_some());
                    purgeable_bytes += record.size;
                }
                Position::NonPurgeable(_) => {
                    assert!(!record.is_purgeable(), "{id:?} is purgeable but not queued");
                }
                Position::Detached => panic!("{id:?} is tracked but detached"),
            }

            if record.is_usable_as_scratch() {
                let key = record.scratch_key.as_ref().expect("scratch usable resource must have a scratch key");
                assert!(self.scratch.contains(key, id), "{id:?} is usable as scratch but not indexed");
            }
            if let Some(key) = record.unique_key.as_ref() {
                assert_eq!(self.unique.get(key), Some(id));
            }
        }

        self.purgeable.check(&self.records, |id| {
            self.records.get(id).map(|record| record.position).unwrap_or(Position::Detached)
        });
        self.non_purgeable.check(|id| {
            self.records.get(id).map(|record| record.position).unwrap_or(Position::Detached)
        });
        assert_eq!(self.purgeable.len() + self.non_purgeable.len(), self.records.len());

        for (key, id) in self.scratch.iter() {
            let record = self.records.get(id).expect("scratch index refers to untracked resource");
            assert_eq!(record.scratch_key.as_ref(), Some(key));
            assert!(record.is_usable_as_scratch(), "{id:?} is indexed as scratch but not usable");
        }
        for (key, id) in self.unique.iter() {
            let record = self.records.get(id).expect("unique index refers to untracked resource");
            assert_eq!(record.unique_key.as_ref(), Some(key));
        }

        assert_eq!(bytes, self.budget.bytes());
        assert_eq!(budgeted_bytes, self.budget.budgeted_bytes());
        assert_eq!(budgeted_count, self.budget.budgeted_count());
        assert_eq!(purgeable_bytes, self.budget.purgeable_bytes());
        assert_eq!(self.records.len(), self.budget.count());
        assert!(budgeted_bytes <= bytes);
        assert!(budgeted_count <= self.records.len());
        for (pid, bytes) in self.budget.pids() {
            assert_eq!(pid_bytes.get(&pid).copied(), Some(bytes), "pid {pid} bytes mismatch");
        }
        assert_eq!(pid_bytes.len(), self.budget.pids().count());
    }

    fn make_ref(&self, id: ResourceId) -> Option<ResourceRef<R>> {
        self.records
            .get(id)
            .map(|record| ResourceRef::new(record.shared.clone(), self.mailbox.clone()))
    }

    fn unref_by_id(&mut self, id: ResourceId) {
        let Some(record) = self.records.get_mut(id) else {
            tracing::trace!("[resource cache]: ignore unref of untracked {id:?}");
            return;
        };
        strict_assert!(record.refs > 0);
        if record.refs == 0 {
            return;
        }
        record.refs -= 1;
        if record.refs == 0 {
            self.on_ref_zero(id, true);
        }
    }

    fn ref_and_make_resource_mru(&mut self, id: ResourceId) {
        let Some(record) = self.records.get(id) else {
            return;
        };
        let (position, size) = (record.position, record.size);
        if let Position::Purgeable(index) = position {
            self.purgeable.remove(index, &mut self.records);
            self.budget.sub_purgeable(size);
            self.non_purgeable.push(id, &mut self.records);
        }
        let timestamp = self.next_timestamp();
        if let Some(record) = self.records.get_mut(id) {
            record.purgeable_since = None;
            record.refs += 1;
            record.timestamp = timestamp;
        }
    }

    /// A reference count or the command buffer usage count of the resource reached zero.
    fn on_ref_zero(&mut self, id: ResourceId, main_ref: bool) {
        let Some(record) = self.records.get(id) else {
            return;
        };
        if main_ref && record.is_usable_as_scratch() {
            if let Some(key) = record.scratch_key.clone() {
                self.scratch.insert(key, id);
            }
        }
        if !record.is_idle() || matches!(record.position, Position::Purgeable(_)) {
            return;
        }

        let timestamp = self.next_timestamp();
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        record.timestamp = timestamp;
        if !record.is_purgeable() {
            return;
        }
        let Position::NonPurgeable(index) = record.position else {
            return;
        };
        record.purgeable_since = Some(Instant::now());
        let size = record.size;
        self.non_purgeable.remove(index, &mut self.records);
        self.purgeable.insert(id, &mut self.records);
        self.budget.add_purgeable(size);

        let Some(record) = self.records.get(id) else {
            return;
        };
        tracing::trace!("[resource cache]: {id:?} becomes purgeable");
        if record.is_budgeted() {
            let keyed = record.scratch_key.is_some() || record.unique_key.is_some();
            if keyed && !self.budget.over_budget(false) {
                return;
            }
        } else if !record.flags.contains(ResourceFlags::WRAPPED)
            && record.scratch_key.is_some()
            && self.budget.would_fit(size)
        {
            self.set_budgeted_type_inner(id, BudgetedType::Budgeted);
            return;
        }

        self.destroy(id, false);
    }

    fn remove_unique_key_inner(&mut self, id: ResourceId) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let Some(key) = record.unique_key.take() else {
            return;
        };
        self.unique.remove(&key, id);
        if record.is_usable_as_scratch() {
            if let Some(scratch_key) = record.scratch_key.clone() {
                self.scratch.insert(scratch_key, id);
            }
        }
        self.reconcile(id);
    }

    fn set_budgeted_type_inner(&mut self, id: ResourceId, budgeted_type: BudgetedType) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let was_budgeted = record.is_budgeted();
        record.budgeted_type = budgeted_type;
        let budgeted = record.is_budgeted();
        let size = record.size;

        if was_budgeted != budgeted {
            self.budget.on_budgeted_change(size, budgeted);
            if let Some(scratch_key) = record.scratch_key.clone() {
                if record.is_usable_as_scratch() {
                    self.scratch.insert(scratch_key, id);
                } else {
                    self.scratch.remove(&scratch_key, id);
                }
            }
        }

        self.reconcile(id);
        if budgeted && !was_budgeted {
            self.purge_over_budget(false);
        }
    }

    /// Move the resource to the container matching its current state.
    fn reconcile(&mut self, id: ResourceId) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        match (record.position, record.is_purgeable()) {
            (Position::Purgeable(index), false) => {
                record.purgeable_since = None;
                let size = record.size;
                self.purgeable.remove(index, &mut self.records);
                self.budget.sub_purgeable(size);
                self.non_purgeable.push(id, &mut self.records);
            }
            (Position::NonPurgeable(_), true) => self.on_ref_zero(id, false),
            _ => {}
        }
    }

    fn process_invalidations(&mut self) {
        for invalidation in self.inbox.drain_invalidations() {
            self.metrics.resource_invalidate.increase(1);
            if let Some(listener) = self.listener.as_ref() {
                listener.on_unique_key_invalidated(&invalidation.key);
            }
            let Some(id) = self.unique.get(&invalidation.key) else {
                continue;
            };
            tracing::trace!(
                "[resource cache]: unique key {:?} of {id:?} invalidated, purge: {}",
                invalidation.key,
                invalidation.purge
            );
            self.remove_unique_key_inner(id);
            if invalidation.purge && self.is_purgeable(id) {
                self.evict(id);
            }
        }
    }

    /// Evict least recently used resources while over budget, then once more after the secondary cache dropped its
    /// unique references.
    fn purge_over_budget(&mut self, contention: bool) {
        let mut still_over = self.evict_while_over_budget(contention);

        if still_over {
            if let Some(secondary) = self.secondary.clone() {
                secondary.drop_unique_refs();
                self.process_returned();
                still_over = self.evict_while_over_budget(contention);
            }
        }

        if still_over {
            tracing::warn!(
                "[resource cache]: still over budget after purge, budgeted bytes: {}, limit: {}",
                self.budget.budgeted_bytes(),
                self.budget.effective_limit(contention)
            );
        }
    }

    fn evict_while_over_budget(&mut self, contention: bool) -> bool {
        while self.budget.over_budget(contention) {
            let Some(id) = self.purgeable.peek() else {
                return true;
            };
            self.evict(id);
        }
        false
    }

    fn purge_unlocked_matching(&mut self, scratch_only: bool, filter: impl Fn(&Record<R>) -> bool) {
        let victims = self
            .purgeable
            .sorted(&self.records)
            .into_iter()
            .filter(|id| {
                self.records
                    .get(*id)
                    .is_some_and(|record| (!scratch_only || record.unique_key.is_none()) && filter(record))
            })
            .collect_vec();
        for id in victims {
            self.evict(id);
        }
    }

    fn evict(&mut self, id: ResourceId) {
        tracing::debug!("[resource cache]: evict {id:?}");
        if self.destroy(id, false) {
            self.metrics.resource_evict.increase(1);
        }
    }

    /// Stop tracking the resource and run its release or abandon hook.
    fn destroy(&mut self, id: ResourceId, abandon: bool) -> bool {
        let Some(record) = self.remove(id) else {
            return false;
        };
        let object = record.shared.object();
        if abandon {
            object.on_abandon();
        } else {
            object.on_release();
        }
        record.shared.mark_destroyed();
        true
    }

    fn remove(&mut self, id: ResourceId) -> Option<Record<R>> {
        let record = self.records.get(id)?;
        let size = record.size;
        let budgeted = record.is_budgeted();
        let pid = record.pid();
        let position = record.position;

        match position {
            Position::Purgeable(index) => {
                self.purgeable.remove(index, &mut self.records);
                self.budget.sub_purgeable(size);
            }
            Position::NonPurgeable(index) => {
                self.non_purgeable.remove(index, &mut self.records);
            }
            Position::Detached => {
                strict_assert!(false, "tracked resource {id:?} is detached");
            }
        }
        self.budget.on_remove(size, budgeted, pid);
        self.metrics.resource_remove.increase(1);

        let record = self.records.remove(id)?;
        if let Some(key) = record.unique_key.as_ref() {
            self.unique.remove(key, id);
        }
        if let Some(key) = record.scratch_key.as_ref() {
            self.scratch.remove(key, id);
        }
        tracing::trace!("[resource cache]: remove {id:?}, size: {size}");
        Some(record)
    }

    fn destroy_all(&mut self, abandon: bool) {
        single_owner!(self);

        if let Some(secondary) = self.secondary.clone() {
            secondary.drop_all_refs();
        }
        self.process_returned();

        tracing::debug!(
            "[resource cache]: {} all {} resources",
            if abandon { "abandon" } else { "release" },
            self.records.len()
        );
        while let Some(id) = self.non_purgeable.last() {
            self.destroy(id, abandon);
        }
        while let Some(id) = self.purgeable.peek() {
            self.destroy(id, abandon);
        }

        strict_assert_eq!(self.budget.count(), 0);
        strict_assert_eq!(self.budget.bytes(), 0);
        strict_assert_eq!(self.scratch.len(), 0);
        strict_assert_eq!(self.unique.len(), 0);
    }

    fn next_timestamp(&mut self) -> u32 {
        if self.timestamp == 0 && !self.records.is_empty() {
            self.renumber_timestamps();
        }
        let timestamp = self.timestamp;
        self.timestamp = self.timestamp.wrapping_add(1);
        timestamp
    }

    /// Reassign `0..n` to all tracked resources keeping their relative order after the counter wrapped.
    fn renumber_timestamps(&mut self) {
        tracing::debug!("[resource cache]: renumber timestamps of {} resources", self.records.len());

        let purgeable = self.purgeable.drain_sorted(&mut self.records);
        self.non_purgeable.sort_by_timestamp(&mut self.records);
        let non_purgeable = self.non_purgeable.iter().collect_vec();

        let merged = purgeable
            .iter()
            .copied()
            .merge_by(non_purgeable, |a, b| {
                (self.records.timestamp(*a), *a) <= (self.records.timestamp(*b), *b)
            })
            .collect_vec();

        let mut next = 0;
        for id in merged {
            if let Some(record) = self.records.get_mut(id) {
                record.timestamp = next;
                next += 1;
            }
        }
        for id in purgeable {
            self.purgeable.insert(id, &mut self.records);
        }
        self.timestamp = next;
    }

    #[cfg(test)]
    pub(crate) fn set_timestamp(&mut self, timestamp: u32) {
        self.timestamp = timestamp;
    }

    #[cfg(test)]
    pub(crate) fn timestamp_of(&self, id: ResourceId) -> Option<u32> {
        self.records.get(id).map(|record| record.timestamp)
    }
}

impl<R> std::fmt::Debug for ResourceCache<R>
where
    R: GpuResource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("name", &self.config.name)
            .field("max_bytes", &self.budget.max_bytes())
            .field("bytes", &self.budget.bytes())
            .field("budgeted_bytes", &self.budget.budgeted_bytes())
            .field("resources", &self.records.len())
            .field("purgeable", &self.purgeable.len())
            .finish()
    }
}

impl<R> Drop for ResourceCache<R>
where
    R: GpuResource,
{
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        builder::ResourceCacheBuilder,
        config::FramePurgeConfig,
        key::ResourceType,
        test_utils::{MockCounters, MockResource, MockSecondaryCache, RecordingListener},
    };

    const MB: usize = 1 << 20;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    fn cache(max_bytes: usize) -> ResourceCache<MockResource> {
        ResourceCacheBuilder::new(max_bytes).build().unwrap()
    }

    fn scratch_key(ty: ResourceType, word: u32) -> ScratchKey {
        ScratchKey::builder(ty).with_word(word).build()
    }

    fn unique_key(cache: &ResourceCache<MockResource>, word: u32) -> UniqueKey {
        UniqueKey::builder(cache.context().generate_domain()).with_word(word).build()
    }

    /// Insert a budgeted scratch resource and return it to the cache right away.
    fn insert_idle(
        cache: &mut ResourceCache<MockResource>,
        counters: &Arc<MockCounters>,
        key: ScratchKey,
    ) -> ResourceId {
        let r = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(key),
        );
        let id = r.id();
        cache.unref(r);
        id
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_tag_stack_checks_single_owner() {
        let cache = cache(4 * MB);
        let owner = cache.owner.clone();
        let guard = owner.enter();

        let (rejected, mut cache) = thread::spawn(move || {
            let mut cache = cache;
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cache.push_resource_tag(ResourceTag::new(1, 0, 0, 0, "app"));
            }));
            (res.is_err(), cache)
        })
        .join()
        .unwrap();
        assert!(rejected);
        assert_eq!(cache.current_resource_tag(), None);

        drop(guard);
        let tag = ResourceTag::new(1, 0, 0, 0, "app");
        cache.push_resource_tag(tag.clone());
        assert_eq!(cache.current_resource_tag(), Some(&tag));
        assert_eq!(cache.pop_resource_tag(), Some(tag));
    }

    #[test]
    fn test_debug_summary() {
        let mut cache = ResourceCacheBuilder::new(4 * MB).with_name("debug").build::<MockResource>().unwrap();
        let r = cache.insert(MockResource::new(MB), ResourceDesc::new());
        let text = format!("{cache:?}");
        assert!(text.starts_with("ResourceCache {"), "{text}");
        assert!(text.contains(r#"name: "debug""#), "{text}");
        assert!(text.contains(&format!("bytes: {MB}")), "{text}");
        cache.unref(r);
    }

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<ResourceCache<MockResource>>();
        is_send_sync_static::<Mailbox>();
    }

    #[test_log::test]
    fn test_lru_keeps_most_recently_inserted() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(5 * MB);
        let ty = cache.context().generate_resource_type();

        let ids = (0..10)
            .map(|i| insert_idle(&mut cache, &counters, scratch_key(ty, i)))
            .collect_vec();

        for id in &ids[..5] {
            assert!(!cache.contains(*id));
        }
        for id in &ids[5..] {
            assert!(cache.contains(*id));
            assert!(cache.is_purgeable(*id));
        }
        assert_eq!(cache.budgeted_bytes(), 5 * MB);
        assert_eq!(cache.resource_count(), 5);
        assert_eq!(counters.released(), 5);
        cache.validate();
    }

    #[test]
    fn test_scratch_reuse() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let key = scratch_key(cache.context().generate_resource_type(), 256);

        let id = insert_idle(&mut cache, &counters, key.clone());
        assert_eq!(cache.statistics().scratch_count, 1);

        let r = cache.find_and_ref_scratch_resource(&key).unwrap();
        assert_eq!(r.id(), id);
        assert!(!cache.is_purgeable(id));
        assert!(cache.find_and_ref_scratch_resource(&key).is_none());
        cache.validate();

        cache.unref(r);
        assert!(cache.is_purgeable(id));
        assert!(cache.find_and_ref_scratch_resource(&key).is_some_and(|r| r.id() == id));
        cache.validate();
    }

    #[test]
    fn test_unique_key_round_trip() {
        let mut cache = cache(16 * MB);
        let key = unique_key(&cache, 1);
        let skey = scratch_key(cache.context().generate_resource_type(), 1);

        let r = cache.insert(MockResource::new(MB), ResourceDesc::new().with_scratch_key(skey.clone()));
        let id = r.id();
        cache.change_unique_key(id, key.clone());
        assert!(cache.has_unique_key(&key));
        assert_eq!(cache.unique_key(id), Some(&key));
        cache.unref(r);

        // Uniquely keyed resources are never available as scratch.
        assert!(cache.find_and_ref_scratch_resource(&skey).is_none());

        let r = cache.find_and_ref_unique_resource(&key).unwrap();
        assert_eq!(r.id(), id);
        cache.unref(r);
        cache.validate();

        cache.remove_unique_key(id);
        assert!(cache.find_and_ref_unique_resource(&key).is_none());
        let r = cache.find_and_ref_scratch_resource(&skey).unwrap();
        assert_eq!(r.id(), id);
        cache.unref(r);

        // An invalid key removes the unique key as well.
        cache.change_unique_key(id, key.clone());
        cache.change_unique_key(id, UniqueKey::default());
        assert!(!cache.has_unique_key(&key));
        cache.validate();
    }

    #[test]
    fn test_change_unique_key_takes_key_from_previous_holder() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let k1 = unique_key(&cache, 1);
        let k2 = unique_key(&cache, 2);
        let skey = scratch_key(cache.context().generate_resource_type(), 1);

        // Idle previous holder without a scratch key is freed.
        let r1 = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        let id1 = r1.id();
        cache.change_unique_key(id1, k1.clone());
        cache.unref(r1);
        assert!(cache.is_purgeable(id1));

        let r2 = cache.insert(MockResource::new(MB), ResourceDesc::new());
        cache.change_unique_key(r2.id(), k1.clone());
        assert!(!cache.contains(id1));
        assert_eq!(counters.released(), 1);
        assert_eq!(cache.find_and_ref_unique_resource(&k1).map(|r| r.id()), Some(r2.id()));

        // A referenced previous holder only loses the key.
        let r3 = cache.insert(MockResource::new(MB), ResourceDesc::new().with_scratch_key(skey.clone()));
        let id3 = r3.id();
        cache.change_unique_key(id3, k2.clone());
        let r4 = cache.insert(MockResource::new(MB), ResourceDesc::new());
        cache.change_unique_key(r4.id(), k2.clone());
        assert!(cache.contains(id3));
        assert_eq!(cache.unique_key(id3), None);
        assert_eq!(cache.unique_key(r4.id()), Some(&k2));

        cache.unref(r3);
        assert_eq!(cache.find_and_ref_scratch_resource(&skey).map(|r| r.id()), Some(id3));

        cache.process_returned();
        cache.validate();
    }

    #[test]
    fn test_purge_scratch_only_is_idempotent() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();

        let mut uniques = vec![];
        for i in 0..4 {
            insert_idle(&mut cache, &counters, scratch_key(ty, i));
            let r = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
            cache.change_unique_key(r.id(), unique_key(&cache, i));
            uniques.push(r.id());
            cache.unref(r);
        }
        assert_eq!(cache.purgeable_count(), 8);

        cache.purge_unlocked_resources(true);
        assert_eq!(counters.released(), 4);
        assert!(uniques.iter().all(|id| cache.is_purgeable(*id)));

        cache.purge_unlocked_resources(true);
        assert_eq!(counters.released(), 4);

        cache.purge_unlocked_resources(false);
        assert_eq!(counters.released(), 8);
        assert_eq!(cache.resource_count(), 0);
        cache.validate();
    }

    #[test]
    fn test_purge_to_make_headroom() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(4 * MB);
        let ty = cache.context().generate_resource_type();

        let ids = (0..4)
            .map(|i| insert_idle(&mut cache, &counters, scratch_key(ty, i)))
            .collect_vec();

        assert!(cache.purge_to_make_headroom(0));
        assert!(!cache.purge_to_make_headroom(4 * MB + 1));
        assert_eq!(counters.released(), 0);

        assert!(cache.purge_to_make_headroom(2 * MB));
        assert_eq!(counters.released(), 2);
        assert!(!cache.contains(ids[0]));
        assert!(!cache.contains(ids[1]));
        assert!(cache.contains(ids[2]));
        assert!(cache.would_fit(2 * MB));

        // Nothing purgeable left to make room for more.
        let held = [2, 3].map(|i| cache.find_and_ref_scratch_resource(&scratch_key(ty, i)).unwrap());
        assert!(!cache.purge_to_make_headroom(3 * MB));
        assert_eq!(counters.released(), 2);

        for r in held {
            cache.unref(r);
        }
        cache.validate();
    }

    #[test]
    fn test_headroom_with_unlimited_budget() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(usize::MAX);
        let ty = cache.context().generate_resource_type();

        let r = cache.insert(
            MockResource::with_counters(1, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 1)),
        );
        let id = r.id();
        cache.unref(r);
        assert!(cache.is_purgeable(id));

        assert!(!cache.would_fit(usize::MAX));
        assert!(cache.purge_to_make_headroom(usize::MAX));
        assert!(!cache.contains(id));
        assert_eq!(counters.released(), 1);
        assert!(cache.would_fit(usize::MAX));
        cache.validate();
    }

    #[test_log::test]
    fn test_cross_thread_return() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(4 * MB);
        let ty = cache.context().generate_resource_type();

        let r = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 1)),
        );
        let id = r.id();
        thread::spawn(move || drop(r)).join().unwrap();

        assert!(!cache.is_purgeable(id));
        cache.purge_as_needed();
        assert!(cache.is_purgeable(id));
        cache.validate();

        // Over budget, the returned resource is evicted.
        let r = cache.insert(
            MockResource::with_counters(8 * MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 2)),
        );
        let id = r.id();
        assert!(cache.over_budget());
        thread::spawn(move || drop(r)).join().unwrap();

        assert!(cache.contains(id));
        cache.purge_as_needed();
        assert!(!cache.contains(id));
        assert!(!cache.over_budget());
        assert_eq!(counters.released(), 2);
        cache.validate();
    }

    #[test_log::test]
    fn test_pid_overflow_callback() {
        let fired = Arc::new(Mutex::new(vec![]));
        let mut cache = cache(64 * MB);
        let f = fired.clone();
        cache
            .init_gpu_memory_limit(3 * MB, move |pid, bytes| f.lock().push((pid, bytes)))
            .unwrap();
        assert!(cache.init_gpu_memory_limit(0, |_, _| {}).is_err());

        let desc = ResourceDesc::new()
            .with_tag(ResourceTag::new(7, 0, 0, 0, ""))
            .with_flags(ResourceFlags::REAL_ALLOC);

        let mut held = (0..3)
            .map(|_| cache.insert(MockResource::new(MB), desc.clone()))
            .collect_vec();
        assert!(fired.lock().is_empty());
        held.push(cache.insert(MockResource::new(MB), desc.clone()));
        assert_eq!(*fired.lock(), vec![(7, 4 * MB)]);
        held.push(cache.insert(MockResource::new(MB), desc.clone()));
        assert_eq!(fired.lock().len(), 1);
        assert!(cache.is_pid_over_limit(7));

        // Resources without the real allocation flag are not attributed.
        let other = cache.insert(MockResource::new(MB), desc.clone().with_flags(ResourceFlags::empty()));
        assert_eq!(cache.bytes_of_pid(7), 5 * MB);

        cache.release_by_pid(&[7]);
        assert!(held.iter().all(|r| r.is_destroyed()));
        assert!(other.is_destroyed());
        assert_eq!(cache.bytes_of_pid(7), 0);
        assert!(!cache.is_pid_over_limit(7));

        let _again = (0..4)
            .map(|_| cache.insert(MockResource::new(MB), desc.clone()))
            .collect_vec();
        assert_eq!(fired.lock().len(), 2);
        cache.validate();
    }

    #[test]
    fn test_timestamp_wraparound_keeps_lru_order() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();

        let a = insert_idle(&mut cache, &counters, scratch_key(ty, 0));
        let b = insert_idle(&mut cache, &counters, scratch_key(ty, 1));
        let c = insert_idle(&mut cache, &counters, scratch_key(ty, 2));

        cache.set_timestamp(u32::MAX);
        let rd = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 3)),
        );
        let d = rd.id();
        assert_eq!(cache.timestamp_of(d), Some(u32::MAX));
        let re = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 4)),
        );
        let e = re.id();

        assert_eq!([a, b, c, d, e].map(|id| cache.timestamp_of(id).unwrap()), [0, 1, 2, 3, 4]);
        cache.validate();

        // Touch `a` so that `b` and `c` become the least recently used.
        let ra = cache.find_and_ref_scratch_resource(&scratch_key(ty, 0)).unwrap();
        cache.unref(ra);
        cache.unref(rd);
        cache.unref(re);

        cache.set_limit(3 * MB);
        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        assert!(!cache.contains(c));
        assert!(cache.contains(d));
        assert!(cache.contains(e));
        cache.validate();
    }

    #[test]
    fn test_requests_flush_and_command_buffer_usage() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(MB);
        let key = scratch_key(cache.context().generate_resource_type(), 0);
        let mailbox = cache.mailbox();

        let r = cache.insert(
            MockResource::with_counters(2 * MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(key.clone()),
        );
        let id = r.id();
        cache.add_command_buffer_usage(id);
        cache.unref(r);

        assert!(cache.contains(id));
        assert!(!cache.is_purgeable(id));
        assert!(cache.requests_flush());
        cache.validate();

        thread::spawn(move || mailbox.return_command_buffer_usage(id)).join().unwrap();
        cache.purge_as_needed();
        assert!(!cache.contains(id));
        assert!(!cache.requests_flush());
        assert_eq!(counters.released(), 1);
        cache.validate();
    }

    #[test]
    fn test_command_buffer_usage_pins_purgeable_resource() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let key = scratch_key(cache.context().generate_resource_type(), 0);
        let id = insert_idle(&mut cache, &counters, key);

        cache.add_command_buffer_usage(id);
        assert!(!cache.is_purgeable(id));
        cache.purge_unlocked_resources(false);
        assert!(cache.contains(id));
        cache.validate();

        cache.remove_command_buffer_usage(id);
        assert!(cache.is_purgeable(id));
        cache.validate();
    }

    #[test]
    fn test_idle_retention_rules() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();
        let new = || MockResource::with_counters(MB, counters.clone());

        // Budgeted without any key.
        let r = cache.insert(new(), ResourceDesc::new());
        let id = r.id();
        cache.unref(r);
        assert!(!cache.contains(id));

        // Unbudgeted uncacheable without a scratch key.
        let r = cache.insert(
            new(),
            ResourceDesc::new().with_budgeted_type(BudgetedType::UnbudgetedUncacheable),
        );
        let id = r.id();
        assert_eq!(cache.budgeted_bytes(), 0);
        assert_eq!(cache.bytes(), MB);
        cache.unref(r);
        assert!(!cache.contains(id));

        // Unbudgeted with a scratch key is promoted when it fits.
        let skey = scratch_key(ty, 0);
        let r = cache.insert(
            new(),
            ResourceDesc::new()
                .with_budgeted_type(BudgetedType::UnbudgetedUncacheable)
                .with_scratch_key(skey.clone()),
        );
        let id = r.id();
        cache.unref(r);
        assert_eq!(cache.budgeted_type(id), Some(BudgetedType::Budgeted));
        assert!(cache.is_purgeable(id));
        assert_eq!(cache.budgeted_bytes(), MB);
        assert_eq!(cache.find_and_ref_scratch_resource(&skey).map(|r| r.id()), Some(id));
        cache.process_returned();

        // Wrapped objects are never promoted.
        let r = cache.insert(
            new(),
            ResourceDesc::new()
                .with_budgeted_type(BudgetedType::UnbudgetedUncacheable)
                .with_scratch_key(scratch_key(ty, 1))
                .with_flags(ResourceFlags::WRAPPED),
        );
        let id = r.id();
        cache.unref(r);
        assert!(!cache.contains(id));

        // Unbudgeted cacheable stays while it holds a unique key.
        let key = unique_key(&cache, 0);
        let r = cache.insert(
            new(),
            ResourceDesc::new().with_budgeted_type(BudgetedType::UnbudgetedCacheable),
        );
        let id = r.id();
        cache.change_unique_key(id, key.clone());
        cache.unref(r);
        assert!(cache.contains(id));
        assert!(!cache.is_purgeable(id));
        cache.purge_unlocked_resources(false);
        assert!(cache.contains(id));
        cache.validate();

        let r = cache.find_and_ref_unique_resource(&key).unwrap();
        cache.unref(r);
        cache.remove_unique_key(id);
        assert!(!cache.contains(id));
        cache.validate();
    }

    #[test]
    fn test_unique_key_invalidation() {
        let counters = Arc::new(MockCounters::default());
        let listener = Arc::new(RecordingListener::default());
        let mut cache = ResourceCacheBuilder::new(16 * MB)
            .with_key_invalidation_listener(listener.clone())
            .build::<MockResource>()
            .unwrap();
        let mailbox = cache.mailbox();
        let k1 = unique_key(&cache, 1);
        let k2 = unique_key(&cache, 2);

        let r1 = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        cache.change_unique_key(r1.id(), k1.clone());
        let r2 = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        let id2 = r2.id();
        cache.change_unique_key(id2, k2.clone());
        cache.unref(r2);

        let remote = mailbox.clone();
        let (k1c, k2c) = (k1.clone(), k2.clone());
        thread::spawn(move || {
            remote.invalidate_unique_key(k1c, false);
            remote.invalidate_unique_key(k2c, true);
        })
        .join()
        .unwrap();

        assert!(cache.has_unique_key(&k1));
        cache.purge_as_needed();
        assert!(!cache.has_unique_key(&k1));
        assert!(!cache.has_unique_key(&k2));
        assert!(cache.contains(r1.id()));
        assert!(!cache.contains(id2));
        assert_eq!(listener.keys(), vec![k1, k2]);

        // Keyless budgeted resources are freed once idle.
        let id1 = r1.id();
        cache.unref(r1);
        assert!(!cache.contains(id1));
        assert_eq!(counters.released(), 2);
        cache.validate();
    }

    #[test]
    fn test_secondary_cache_drops_refs_when_over_budget() {
        let counters = Arc::new(MockCounters::default());
        let secondary = Arc::new(MockSecondaryCache::<MockResource>::default());
        let mut cache = ResourceCacheBuilder::new(MB)
            .with_secondary_cache(secondary.clone())
            .build::<MockResource>()
            .unwrap();
        let ty = cache.context().generate_resource_type();

        let r = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 0)),
        );
        let pinned = r.id();
        secondary.hold(cache.ref_resource(&r));
        cache.unref(r);
        assert!(!cache.is_purgeable(pinned));

        let r = cache.insert(
            MockResource::with_counters(MB, counters.clone()),
            ResourceDesc::new().with_scratch_key(scratch_key(ty, 1)),
        );
        assert!(secondary.is_empty());
        assert!(!cache.contains(pinned));
        assert!(cache.contains(r.id()));
        assert_eq!(counters.released(), 1);
        cache.unref(r);
        cache.validate();
    }

    #[test]
    fn test_release_and_abandon() {
        let counters = Arc::new(MockCounters::default());
        {
            let mut cache = cache(16 * MB);
            let ty = cache.context().generate_resource_type();
            let held = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
            insert_idle(&mut cache, &counters, scratch_key(ty, 0));

            cache.abandon_all();
            assert_eq!(counters.abandoned(), 2);
            assert_eq!(counters.released(), 0);
            assert!(held.is_destroyed());
            assert_eq!(held.gpu_memory_size(), MB);
            assert_eq!(cache.resource_count(), 0);
            assert_eq!(cache.bytes(), 0);
            cache.validate();

            let held = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
            assert!(cache.release_resource(held.id()));
            assert!(!cache.release_resource(held.id()));
            assert!(held.is_destroyed());
            assert_eq!(counters.released(), 1);

            insert_idle(&mut cache, &counters, scratch_key(ty, 1));
        }
        // Dropping the cache releases what is left.
        assert_eq!(counters.released(), 2);
    }

    #[test]
    fn test_purge_and_release_by_tag() {
        let counters = Arc::new(MockCounters::default());
        let listener = Arc::new(RecordingListener::default());
        let mut cache = ResourceCacheBuilder::new(16 * MB)
            .with_key_invalidation_listener(listener.clone())
            .build::<MockResource>()
            .unwrap();
        let ty = cache.context().generate_resource_type();

        let app = ResourceTag::new(1, 0, 0, 0, "app");
        let other = ResourceTag::new(2, 0, 0, 0, "other");

        cache.push_resource_tag(app.clone());
        let idle_app = insert_idle(&mut cache, &counters, scratch_key(ty, 0));
        let held_app = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        let key = unique_key(&cache, 0);
        cache.change_unique_key(held_app.id(), key.clone());
        assert_eq!(cache.resource_tag(held_app.id()), Some(&app));

        cache.push_resource_tag(other.clone());
        let idle_other = insert_idle(&mut cache, &counters, scratch_key(ty, 1));
        assert_eq!(cache.pop_resource_tag(), Some(other.clone()));
        assert_eq!(cache.current_resource_tag(), Some(&app));
        assert_eq!(cache.pop_resource_tag(), Some(app.clone()));
        assert_eq!(cache.current_resource_tag(), None);

        cache.purge_unlocked_resources_by_pid(false, &[1]);
        assert!(!cache.contains(idle_app));
        assert!(cache.contains(held_app.id()));
        assert!(cache.contains(idle_other));

        let filter = ResourceTag::new(0, 0, 0, 0, "app");
        cache.release_by_tag(|tag| filter.filter(tag));
        assert!(held_app.is_destroyed());
        assert!(cache.contains(idle_other));
        assert_eq!(listener.keys(), vec![key]);

        cache.purge_unlocked_resources_by_tag(true, |tag| tag.pid == 2);
        assert!(!cache.contains(idle_other));
        assert_eq!(counters.released(), 3);
        cache.validate();
    }

    #[test]
    fn test_purge_unlocked_bytes() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();

        let s1 = insert_idle(&mut cache, &counters, scratch_key(ty, 0));
        let u1 = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        let u1 = {
            let id = u1.id();
            cache.change_unique_key(id, unique_key(&cache, 1));
            cache.unref(u1);
            id
        };
        let s2 = insert_idle(&mut cache, &counters, scratch_key(ty, 1));
        let u2 = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        let u2 = {
            let id = u2.id();
            cache.change_unique_key(id, unique_key(&cache, 2));
            cache.unref(u2);
            id
        };
        assert_eq!(cache.purgeable_bytes(), 4 * MB);

        cache.purge_unlocked_bytes(2 * MB, true);
        assert!(!cache.contains(s1));
        assert!(!cache.contains(s2));
        assert!(cache.contains(u1));
        assert!(cache.contains(u2));

        cache.purge_unlocked_bytes(MB, false);
        assert!(!cache.contains(u1));
        assert!(cache.contains(u2));
        assert_eq!(cache.max_bytes(), 16 * MB);
        cache.validate();
    }

    #[test]
    fn test_purge_resources_not_used_since() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();

        let old = insert_idle(&mut cache, &counters, scratch_key(ty, 0));
        thread::sleep(Duration::from_millis(5));
        let since = Instant::now();
        thread::sleep(Duration::from_millis(5));
        let new = insert_idle(&mut cache, &counters, scratch_key(ty, 1));

        cache.purge_resources_not_used_since(since, false);
        assert!(!cache.contains(old));
        assert!(cache.contains(new));
        cache.validate();
    }

    #[test_log::test]
    fn test_frame_deferral() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = ResourceCacheBuilder::new(2 * MB)
            .with_soft_limit_ratio(1.0)
            .with_frame_config(FramePurgeConfig {
                enabled: true,
                overtime: Duration::from_secs(3600),
                max_deferred_bytes: MB,
            })
            .build::<MockResource>()
            .unwrap();
        let ty = cache.context().generate_resource_type();

        cache.begin_frame();
        assert_eq!(cache.frame_count(), 1);
        assert!(!cache.allow_to_purge(None));

        let a = insert_idle(&mut cache, &counters, scratch_key(ty, 0));
        let b = insert_idle(&mut cache, &counters, scratch_key(ty, 1));
        let c = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        assert!(cache.over_budget());
        assert!(cache.contains(a));

        let next_frame_arrived = || true;
        cache.purge_as_needed_with(Some(&next_frame_arrived));
        assert!(!cache.contains(a));
        assert!(cache.contains(b));

        let d = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        assert!(cache.contains(b));

        // Too far over budget to defer.
        let e = cache.insert(MockResource::with_counters(MB, counters.clone()), ResourceDesc::new());
        assert!(!cache.contains(b));
        assert!(cache.over_budget());
        assert_eq!(cache.purgeable_count(), 0);

        cache.end_frame();
        assert!(cache.allow_to_purge(None));
        for r in [c, d, e] {
            cache.unref(r);
        }
        assert!(!cache.over_budget());
        cache.validate();
    }

    #[test]
    fn test_soft_limit() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = ResourceCacheBuilder::new(4 * MB)
            .with_soft_limit_ratio(0.5)
            .build::<MockResource>()
            .unwrap();
        let ty = cache.context().generate_resource_type();

        for i in 0..4 {
            insert_idle(&mut cache, &counters, scratch_key(ty, i));
        }
        assert!(!cache.over_budget());
        assert!(cache.over_budget_with(&|| true));

        cache.purge_as_needed_with(Some(&|| false));
        assert_eq!(cache.resource_count(), 4);
        cache.purge_as_needed_with(Some(&|| true));
        assert_eq!(cache.resource_count(), 2);
        cache.validate();
    }

    #[test]
    fn test_set_budgeted_type() {
        let mut cache = cache(16 * MB);

        let r = cache.insert(MockResource::new(MB), ResourceDesc::new());
        assert!(cache.set_budgeted_type(r.id(), BudgetedType::UnbudgetedUncacheable));
        assert_eq!(cache.budgeted_bytes(), 0);
        assert!(!cache.set_budgeted_type(r.id(), BudgetedType::UnbudgetedUncacheable));
        assert!(cache.set_budgeted_type(r.id(), BudgetedType::Budgeted));
        assert_eq!(cache.budgeted_bytes(), MB);

        cache.change_unique_key(r.id(), unique_key(&cache, 0));
        assert!(!cache.set_budgeted_type(r.id(), BudgetedType::UnbudgetedUncacheable));

        let w = cache.insert(
            MockResource::new(MB),
            ResourceDesc::new()
                .with_budgeted_type(BudgetedType::UnbudgetedCacheable)
                .with_flags(ResourceFlags::WRAPPED),
        );
        assert!(!cache.set_budgeted_type(w.id(), BudgetedType::Budgeted));
        assert_eq!(cache.budgeted_resource_count(), 1);
        cache.validate();
    }

    #[test]
    fn test_remove_scratch_key() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let key = scratch_key(cache.context().generate_resource_type(), 0);

        let id = insert_idle(&mut cache, &counters, key.clone());
        cache.remove_scratch_key(id);
        assert_eq!(cache.scratch_key(id), None);
        assert!(cache.find_and_ref_scratch_resource(&key).is_none());
        assert!(cache.is_purgeable(id));
        cache.validate();
    }

    #[test]
    fn test_ref_resource() {
        let mut cache = cache(16 * MB);
        let key = scratch_key(cache.context().generate_resource_type(), 0);

        let r1 = cache.insert(MockResource::new(MB), ResourceDesc::new().with_scratch_key(key));
        let r2 = cache.ref_resource(&r1);
        assert_eq!(r1.id(), r2.id());
        let id = r1.id();

        cache.unref(r1);
        assert!(!cache.is_purgeable(id));
        cache.unref(r2);
        assert!(cache.is_purgeable(id));
        cache.validate();
    }

    #[test]
    fn test_set_limit_and_update_config() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(4 * MB);
        let ty = cache.context().generate_resource_type();
        for i in 0..4 {
            insert_idle(&mut cache, &counters, scratch_key(ty, i));
        }

        cache.set_limit(3 * MB);
        assert_eq!(cache.resource_count(), 3);
        assert_eq!(cache.config().max_bytes, 3 * MB);

        let config = ResourceCacheConfig {
            name: "renamed".to_string(),
            max_bytes: MB,
            ..Default::default()
        };
        cache.update_config(config).unwrap();
        assert_eq!(cache.resource_count(), 1);
        assert_eq!(cache.config().name, "gpucache");

        let invalid = ResourceCacheConfig {
            soft_limit_ratio: 2.0,
            ..Default::default()
        };
        assert!(cache.update_config(invalid).is_err());
        assert_eq!(cache.max_bytes(), MB);
        cache.validate();
    }

    #[test]
    fn test_statistics() {
        let counters = Arc::new(MockCounters::default());
        let mut cache = cache(16 * MB);
        let ty = cache.context().generate_resource_type();

        let desc = |pid| {
            ResourceDesc::new()
                .with_tag(ResourceTag::new(pid, 0, 0, 0, ""))
                .with_flags(ResourceFlags::REAL_ALLOC)
        };
        let a = cache.insert(MockResource::with_counters(MB, counters.clone()), desc(2));
        let b = cache.insert(
            MockResource::with_counters(2 * MB, counters.clone()),
            desc(1).with_scratch_key(scratch_key(ty, 0)),
        );
        cache.change_unique_key(a.id(), unique_key(&cache, 0));
        cache.unref(b);

        let stats = cache.statistics();
        assert_eq!(
            stats,
            CacheStatistics {
                resource_count: 2,
                budgeted_count: 2,
                purgeable_count: 1,
                scratch_count: 1,
                unique_count: 1,
                bytes: 3 * MB,
                budgeted_bytes: 3 * MB,
                purgeable_bytes: 2 * MB,
                max_bytes: 16 * MB,
                bytes_by_pid: vec![(1, 2 * MB), (2, MB)],
            }
        );
        drop(a);
    }

    #[test]
    fn test_dropped_ref_after_release_is_ignored() {
        let mut cache = cache(16 * MB);

        let r = cache.insert(MockResource::new(MB), ResourceDesc::new());
        cache.release_all();
        drop(r);
        cache.process_returned();
        assert_eq!(cache.resource_count(), 0);
        cache.validate();
    }
}

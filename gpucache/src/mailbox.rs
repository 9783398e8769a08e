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

use crate::{key::UniqueKey, resource::ResourceId};

/// A request to detach a unique key from whatever resource currently holds it.
#[derive(Debug, Clone)]
pub struct UniqueKeyInvalidation {
    /// The invalidated key.
    pub key: UniqueKey,
    /// Also free the holder if it is idle.
    pub purge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Return {
    Ref(ResourceId),
    CommandBufferUsage(ResourceId),
}

/// Thread-safe handle used to post messages to a resource cache from any thread.
///
/// Messages are buffered without bound and applied by the owning thread when it drains the inbox. Posting after the
/// cache is gone is a no-op.
#[derive(Debug, Clone)]
pub struct Mailbox {
    invalidations: flume::Sender<UniqueKeyInvalidation>,
    returns: flume::Sender<Return>,
}

impl Mailbox {
    /// Ask the cache to detach `key` from its holder.
    pub fn invalidate_unique_key(&self, key: UniqueKey, purge: bool) {
        if self.invalidations.send(UniqueKeyInvalidation { key, purge }).is_err() {
            tracing::trace!("[mailbox]: cache is gone, drop unique key invalidation");
        }
    }

    /// Give back a command buffer usage taken with
    /// [`ResourceCache::add_command_buffer_usage`](crate::ResourceCache::add_command_buffer_usage).
    pub fn return_command_buffer_usage(&self, id: ResourceId) {
        self.post(Return::CommandBufferUsage(id));
    }

    pub(crate) fn return_ref(&self, id: ResourceId) {
        self.post(Return::Ref(id));
    }

    fn post(&self, ret: Return) {
        if self.returns.send(ret).is_err() {
            tracing::trace!("[mailbox]: cache is gone, drop {ret:?}");
        }
    }
}

pub(crate) struct Inbox {
    invalidations: flume::Receiver<UniqueKeyInvalidation>,
    returns: flume::Receiver<Return>,
}

impl Inbox {
    pub(crate) fn drain_invalidations(&self) -> Vec<UniqueKeyInvalidation> {
        self.invalidations.try_iter().collect()
    }

    pub(crate) fn drain_returns(&self) -> Vec<Return> {
        self.returns.try_iter().collect()
    }

    #[cfg(test)]
    pub(crate) fn has_pending_returns(&self) -> bool {
        !self.returns.is_empty()
    }
}

pub(crate) fn mailbox() -> (Mailbox, Inbox) {
    let (itx, irx) = flume::unbounded();
    let (rtx, rrx) = flume::unbounded();
    (
        Mailbox {
            invalidations: itx,
            returns: rtx,
        },
        Inbox {
            invalidations: irx,
            returns: rrx,
        },
    )
}

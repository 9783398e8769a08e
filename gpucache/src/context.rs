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

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::{
    key::{Domain, ResourceType},
    resource::ResourceId,
};

/// Per-context identity generators shared by everything that creates keys or resources for one GPU context.
///
/// Key domains and scratch resource types are handed out from monotonically increasing counters so unrelated
/// subsystems never collide. The counters are never reset; value `0` is reserved as the invalid marker.
#[derive(Debug)]
pub struct CacheContext {
    next_domain: AtomicU32,
    next_resource_type: AtomicU32,
    next_resource_id: AtomicU64,
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheContext {
    /// Create a new context with fresh counters.
    pub fn new() -> Self {
        Self {
            next_domain: AtomicU32::new(1),
            next_resource_type: AtomicU32::new(1),
            next_resource_id: AtomicU64::new(1),
        }
    }

    /// Generate a new unique key domain.
    ///
    /// # Panics
    ///
    /// Panics if the domain space is exhausted.
    pub fn generate_domain(&self) -> Domain {
        let domain = self.next_domain.fetch_add(1, Ordering::Relaxed);
        assert!(domain != u32::MAX, "unique key domain space exhausted");
        Domain::new(domain)
    }

    /// Generate a new scratch resource type.
    ///
    /// # Panics
    ///
    /// Panics if the resource type space is exhausted.
    pub fn generate_resource_type(&self) -> ResourceType {
        let ty = self.next_resource_type.fetch_add(1, Ordering::Relaxed);
        assert!(ty != u32::MAX, "scratch resource type space exhausted");
        ResourceType::new(ty)
    }

    pub(crate) fn next_resource_id(&self) -> ResourceId {
        ResourceId::new(self.next_resource_id.fetch_add(1, Ordering::Relaxed))
    }
}

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

pub use gpucache_common::{
    error::{Error, ErrorKind, Result},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry, RegistryOps},
};

#[cfg(feature = "prometheus")]
pub use gpucache_common::metrics::registry::prometheus::PrometheusMetricsRegistry;

pub use crate::{
    builder::ResourceCacheBuilder,
    cache::ResourceCache,
    config::{FramePurgeConfig, ResourceCacheConfig},
    context::CacheContext,
    key::{Domain, ResourceType, ScratchKey, ScratchKeyBuilder, UniqueKey, UniqueKeyBuilder},
    listener::{KeyInvalidationListener, OverflowCallback, SecondaryCache},
    mailbox::{Mailbox, UniqueKeyInvalidation},
    resource::{BudgetedType, GpuResource, ResourceDesc, ResourceFlags, ResourceId, ResourceRef, ResourceTag},
    stats::CacheStatistics,
};

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

use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, RegistryOps};
use crate::metrics::registry::noop::NoopMetricsRegistry;

/// Metrics reported by a resource cache.
#[derive(Debug)]
pub struct Metrics {
    /// Resources inserted into the cache.
    pub resource_insert: BoxedCounter,
    /// Resources removed from the cache, for any reason.
    pub resource_remove: BoxedCounter,
    /// Purgeable resources evicted to satisfy the budget or an explicit purge.
    pub resource_evict: BoxedCounter,
    /// Scratch lookups that found a reusable resource.
    pub resource_scratch_hit: BoxedCounter,
    /// Scratch lookups that found nothing.
    pub resource_scratch_miss: BoxedCounter,
    /// Unique key lookups that found a resource.
    pub resource_unique_hit: BoxedCounter,
    /// Unique key lookups that found nothing.
    pub resource_unique_miss: BoxedCounter,
    /// Resource references returned through the cross-thread mailbox.
    pub resource_return: BoxedCounter,
    /// Unique key invalidation messages processed.
    pub resource_invalidate: BoxedCounter,
    /// Per-process overflow callbacks fired.
    pub resource_overflow: BoxedCounter,

    /// Bytes of all resources tracked by the cache.
    pub resource_bytes: BoxedGauge,
    /// Bytes of budgeted resources.
    pub resource_budgeted_bytes: BoxedGauge,
    /// Bytes of purgeable resources.
    pub resource_purgeable_bytes: BoxedGauge,
    /// Count of resources tracked by the cache.
    pub resource_count: BoxedGauge,
}

impl Metrics {
    /// Create a new metric with the given name.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &dyn RegistryOps) -> Self {
        let name = name.into();

        let gpucache_resource_op_total = registry.register_counter_vec(
            "gpucache_resource_op_total".into(),
            "gpucache resource cache operations".into(),
            &["name", "op"],
        );
        let gpucache_resource_bytes = registry.register_gauge_vec(
            "gpucache_resource_bytes".into(),
            "gpucache resource cache bytes".into(),
            &["name", "kind"],
        );
        let gpucache_resource_count = registry.register_gauge_vec(
            "gpucache_resource_count".into(),
            "gpucache resource cache resource count".into(),
            &["name"],
        );

        let op = |op: &'static str| gpucache_resource_op_total.counter(&[name.clone(), op.into()]);
        let bytes = |kind: &'static str| gpucache_resource_bytes.gauge(&[name.clone(), kind.into()]);

        Self {
            resource_insert: op("insert"),
            resource_remove: op("remove"),
            resource_evict: op("evict"),
            resource_scratch_hit: op("scratch_hit"),
            resource_scratch_miss: op("scratch_miss"),
            resource_unique_hit: op("unique_hit"),
            resource_unique_miss: op("unique_miss"),
            resource_return: op("return"),
            resource_invalidate: op("invalidate"),
            resource_overflow: op("overflow"),

            resource_bytes: bytes("total"),
            resource_budgeted_bytes: bytes("budgeted"),
            resource_purgeable_bytes: bytes("purgeable"),
            resource_count: gpucache_resource_count.gauge(&[name.clone()]),
        }
    }

    /// Build noop metrics.
    ///
    /// Normally only used in tests.
    pub fn noop() -> Self {
        Self::new("test", &NoopMetricsRegistry)
    }
}

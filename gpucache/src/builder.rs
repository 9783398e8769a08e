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

use gpucache_common::{
    error::{Error, Result},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry},
};

use crate::{
    cache::ResourceCache,
    config::{FramePurgeConfig, ResourceCacheConfig},
    context::CacheContext,
    listener::{KeyInvalidationListener, OverflowCallback, SecondaryCache},
    resource::GpuResource,
};

/// Builder for [`ResourceCache`].
pub struct ResourceCacheBuilder {
    config: ResourceCacheConfig,
    context: Option<Arc<CacheContext>>,
    registry: BoxedRegistry,
    overflow: Option<OverflowCallback>,
    secondary: Option<Arc<dyn SecondaryCache>>,
    listener: Option<Arc<dyn KeyInvalidationListener>>,
}

impl ResourceCacheBuilder {
    /// Create a builder for a cache with a budget of `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            config: ResourceCacheConfig {
                max_bytes,
                ..Default::default()
            },
            context: None,
            registry: Box::new(NoopMetricsRegistry),
            overflow: None,
            secondary: None,
            listener: None,
        }
    }

    /// Set the name of the cache, used as the metrics label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Replace the whole config, including the budget.
    pub fn with_config(mut self, config: ResourceCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the fraction of the budget used as the limit under contention.
    pub fn with_soft_limit_ratio(mut self, ratio: f64) -> Self {
        self.config.soft_limit_ratio = ratio;
        self
    }

    /// Set the frame-boundary purge deferral.
    pub fn with_frame_config(mut self, frame: FramePurgeConfig) -> Self {
        self.config.frame = frame;
        self
    }

    /// Share identity generators with other caches of the same GPU context.
    pub fn with_context(mut self, context: Arc<CacheContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Report metrics to `registry`.
    pub fn with_metrics_registry(mut self, registry: BoxedRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Fire `callback` with `(pid, bytes)` once a process's attributed bytes exceed `threshold`.
    pub fn with_gpu_memory_limit(
        mut self,
        threshold: usize,
        callback: impl Fn(u32, usize) + Send + Sync + 'static,
    ) -> Self {
        self.config.pid_memory_limit = Some(threshold);
        self.overflow = Some(Arc::new(callback));
        self
    }

    /// Set the secondary cache asked to drop its references when purging cannot get under budget.
    pub fn with_secondary_cache(mut self, secondary: Arc<dyn SecondaryCache>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// Set the listener told about invalidated and released unique keys.
    pub fn with_key_invalidation_listener(mut self, listener: Arc<dyn KeyInvalidationListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate the config and build the cache.
    pub fn build<R>(self) -> Result<ResourceCache<R>>
    where
        R: GpuResource,
    {
        self.config.validate()?;
        if self.overflow.is_some() && self.config.pid_memory_limit.is_none() {
            return Err(Error::invalid_config(
                "pid_memory_limit",
                "a limit with the overflow callback",
                "none",
            ));
        }

        let metrics = Arc::new(Metrics::new(self.config.name.clone(), &*self.registry));
        let context = self.context.unwrap_or_default();

        tracing::debug!("[resource cache]: build with config {:?}", self.config);

        Ok(ResourceCache::new(
            self.config,
            context,
            metrics,
            self.overflow,
            self.secondary,
            self.listener,
        ))
    }
}

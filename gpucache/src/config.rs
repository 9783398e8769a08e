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

use std::time::Duration;

use gpucache_common::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Frame-boundary purge deferral.
///
/// While a frame is being rendered, purges are deferred until either `overtime` has elapsed since the frame began or
/// the caller reports that the next frame has already arrived. Deferral never applies while the budgeted bytes exceed
/// the limit by more than `max_deferred_bytes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramePurgeConfig {
    /// Enable deferral.
    pub enabled: bool,
    /// Time after the frame began from which purging is allowed again.
    #[serde(with = "duration_millis")]
    pub overtime: Duration,
    /// Bytes over the limit that may stay allocated while a purge is deferred.
    pub max_deferred_bytes: usize,
}

impl Default for FramePurgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            overtime: Duration::from_millis(8),
            max_deferred_bytes: 32 << 20,
        }
    }
}

/// Tunables of a [`ResourceCache`](crate::ResourceCache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCacheConfig {
    /// Label of the cache in metrics.
    pub name: String,
    /// Budget ceiling in bytes.
    pub max_bytes: usize,
    /// Fraction of `max_bytes` used as the effective limit while contention is reported. Must be in `(0.0, 1.0]`.
    pub soft_limit_ratio: f64,
    /// Per-process byte ceiling for the overflow callback.
    pub pid_memory_limit: Option<usize>,
    /// Frame-boundary purge deferral.
    pub frame: FramePurgeConfig,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            name: "gpucache".to_string(),
            max_bytes: 256 << 20,
            soft_limit_ratio: 0.9,
            pid_memory_limit: None,
            frame: FramePurgeConfig::default(),
        }
    }
}

impl ResourceCacheConfig {
    /// Check the config.
    pub fn validate(&self) -> Result<()> {
        if !(self.soft_limit_ratio > 0.0 && self.soft_limit_ratio <= 1.0) {
            return Err(Error::invalid_config(
                "soft_limit_ratio",
                "(0.0, 1.0]",
                self.soft_limit_ratio,
            ));
        }
        if self.pid_memory_limit == Some(0) {
            return Err(Error::invalid_config("pid_memory_limit", "> 0", 0));
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use gpucache_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ResourceCacheConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate() {
        let config = ResourceCacheConfig {
            soft_limit_ratio: 1.5,
            ..Default::default()
        };
        let e = config.validate().unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Config);

        let config = ResourceCacheConfig {
            soft_limit_ratio: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ResourceCacheConfig {
            pid_memory_limit: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ResourceCacheConfig = serde_json::from_str(
            r#"{
                "max_bytes": 1048576,
                "frame": { "enabled": true, "overtime": 16 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_bytes, 1 << 20);
        assert_eq!(config.name, "gpucache");
        assert!(config.frame.enabled);
        assert_eq!(config.frame.overtime, Duration::from_millis(16));
        assert_eq!(config.frame.max_deferred_bytes, FramePurgeConfig::default().max_deferred_bytes);
        assert_eq!(config.soft_limit_ratio, 0.9);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ResourceCacheConfig {
            pid_memory_limit: Some(64 << 20),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: ResourceCacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}

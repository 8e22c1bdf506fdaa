//! Runtime configuration for the inventory service.
//!
//! Loaded from TOML with humantime duration strings, e.g.:
//!
//! ```toml
//! [cache]
//! ttl = "10m"
//! waiter_timeout = "30s"
//!
//! [collector]
//! source_timeout = "30s"
//! probe_concurrency = 32
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{FleetError, FleetResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub cache: CacheConfig,
    pub collector: CollectorConfig,
    pub classification: ClassificationConfig,
}

/// Snapshot cache behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a published snapshot stays fresh. Bounds external API load
    /// against acceptable staleness for an operational view.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// How long a reader waits on another caller's in-flight refresh before
    /// falling back to an independent one.
    #[serde(with = "humantime_serde")]
    pub waiter_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            waiter_timeout: Duration::from_secs(30),
        }
    }
}

/// Source fan-out behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Per-source timeout; one hung source must not stall the whole refresh.
    #[serde(with = "humantime_serde")]
    pub source_timeout: Duration,

    /// Timeout for a single per-host probe call.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Concurrent per-host probe workers.
    pub probe_concurrency: usize,

    /// Device directory page size when draining the full listing.
    pub page_size: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            source_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            probe_concurrency: 32,
            page_size: 1000,
        }
    }
}

/// Aggregate naming rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Resource type assigned to contract aggregates whose name carries no
    /// recognizable hardware token.
    pub default_resource_type: String,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            default_resource_type: "A100".to_string(),
        }
    }
}

impl FleetConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: FleetConfig =
            toml::from_str(&raw).map_err(|e| FleetError::Configuration {
                message: format!("failed to parse {}: {}", path.display(), e),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.cache.ttl.is_zero() {
            return Err(FleetError::Configuration {
                message: "cache.ttl must be non-zero".to_string(),
            });
        }
        if self.collector.probe_concurrency == 0 {
            return Err(FleetError::Configuration {
                message: "collector.probe_concurrency must be at least 1".to_string(),
            });
        }
        if self.collector.page_size == 0 {
            return Err(FleetError::Configuration {
                message: "collector.page_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

//! Core data model for the fleet inventory snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// GPU capacity assumed for a host when no probe data is available.
pub const DEFAULT_GPU_CAPACITY: u32 = 8;

/// A4000-class hosts carry more cards than the fleet default.
pub const A4000_GPU_CAPACITY: u32 = 10;

/// Allocation pool within a resource type, reflecting allocation intent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Ondemand,
    Spot,
    Runpod,
    Contract,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Pool::Ondemand => "ondemand",
            Pool::Spot => "spot",
            Pool::Runpod => "runpod",
            Pool::Contract => "contract",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of a device in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Active,
    Offline,
    Planned,
    Staged,
    Failed,
    Inventory,
    Decommissioning,
}

impl LifecycleStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Active => "active",
            LifecycleStatus::Offline => "offline",
            LifecycleStatus::Planned => "planned",
            LifecycleStatus::Staged => "staged",
            LifecycleStatus::Failed => "failed",
            LifecycleStatus::Inventory => "inventory",
            LifecycleStatus::Decommissioning => "decommissioning",
        }
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the device directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub hostname: String,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub owner_group: Option<String>,
    #[serde(default)]
    pub nvlink: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub rack: Option<String>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

impl DeviceRecord {
    /// Whether the directory marks this device as GPU-bearing.
    pub fn is_gpu_tagged(&self) -> bool {
        self.tags.iter().any(|tag| {
            let tag = tag.to_ascii_lowercase();
            tag.contains("nvidia") || tag.contains("gpu")
        })
    }
}

/// One page of a paginated device directory listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicePage {
    pub results: Vec<DeviceRecord>,
}

/// A named grouping of hosts in the membership service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateInfo {
    pub name: String,
    pub hostnames: Vec<String>,
}

/// Per-host GPU utilization as reported by the usage probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuUsage {
    pub used: u32,
    pub capacity: u32,
}

impl GpuUsage {
    /// Fallback usage when the probe returned nothing for a host.
    pub fn default_for_host(hostname: &str) -> Self {
        let capacity = if hostname.contains("A4000") {
            A4000_GPU_CAPACITY
        } else {
            DEFAULT_GPU_CAPACITY
        };
        Self { used: 0, capacity }
    }
}

/// Health entry for a host's compute service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeService {
    pub hostname: String,
    pub enabled: bool,
    pub state: String,
}

/// Fully merged inventory record for a single host.
///
/// A hostname maps to at most one `HostRecord` per snapshot, and that record
/// lives in exactly one bucket (a resource-type pool or out-of-stock).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostname: String,
    pub aggregate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<Pool>,
    pub tenant: String,
    pub owner_group: String,
    pub nvlink: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory_url: Option<String>,
    pub vm_count: u32,
    pub gpu_used: u32,
    pub gpu_capacity: u32,
    pub status: LifecycleStatus,
    pub compute_enabled: bool,
    pub gpu_tagged: bool,
}

/// Why a device is excluded from productive capacity.
///
/// Exactly one reason applies per host, assigned in fixed precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfStockReason {
    NetboxNonActive,
    ComputeDisabled,
    InTempest,
    NotInOpenstack,
}

impl std::fmt::Display for OutOfStockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutOfStockReason::NetboxNonActive => "netbox_non_active",
            OutOfStockReason::ComputeDisabled => "compute_disabled",
            OutOfStockReason::InTempest => "in_tempest",
            OutOfStockReason::NotInOpenstack => "not_in_openstack",
        };
        write!(f, "{}", s)
    }
}

/// A host excluded from productive capacity, tagged with its reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutOfStockHost {
    #[serde(flatten)]
    pub record: HostRecord,
    pub reason: OutOfStockReason,
}

/// Hosts excluded from productive capacity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutOfStockBucket {
    pub hosts: Vec<OutOfStockHost>,
}

impl OutOfStockBucket {
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn find(&self, hostname: &str) -> Option<&OutOfStockHost> {
        self.hosts.iter().find(|h| h.record.hostname == hostname)
    }
}

/// Hosts of one hardware class, grouped by pool and then by aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTypeBucket {
    pub resource_type: String,
    pub pools: BTreeMap<Pool, BTreeMap<String, Vec<HostRecord>>>,
}

impl ResourceTypeBucket {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            pools: BTreeMap::new(),
        }
    }

    /// Register an aggregate under a pool, creating its (possibly empty) host list.
    pub fn register_aggregate(&mut self, pool: Pool, aggregate: &str) {
        self.pools
            .entry(pool)
            .or_default()
            .entry(aggregate.to_string())
            .or_default();
    }

    pub fn insert_host(&mut self, pool: Pool, aggregate: &str, record: HostRecord) {
        self.pools
            .entry(pool)
            .or_default()
            .entry(aggregate.to_string())
            .or_default()
            .push(record);
    }

    /// Which pool currently owns the given aggregate, if any.
    pub fn pool_of_aggregate(&self, aggregate: &str) -> Option<Pool> {
        self.pools
            .iter()
            .find(|(_, aggregates)| aggregates.contains_key(aggregate))
            .map(|(pool, _)| *pool)
    }

    pub fn host_count(&self) -> usize {
        self.pools
            .values()
            .flat_map(|aggregates| aggregates.values())
            .map(|hosts| hosts.len())
            .sum()
    }

    pub fn find_host(&self, hostname: &str) -> Option<&HostRecord> {
        self.pools
            .values()
            .flat_map(|aggregates| aggregates.values())
            .flatten()
            .find(|r| r.hostname == hostname)
    }

    pub fn find_host_mut(&mut self, hostname: &str) -> Option<&mut HostRecord> {
        self.pools
            .values_mut()
            .flat_map(|aggregates| aggregates.values_mut())
            .flatten()
            .find(|r| r.hostname == hostname)
    }

    /// Remove a host from a specific aggregate's list, returning the record.
    pub fn remove_host(&mut self, aggregate: &str, hostname: &str) -> Option<HostRecord> {
        for aggregates in self.pools.values_mut() {
            if let Some(hosts) = aggregates.get_mut(aggregate) {
                if let Some(pos) = hosts.iter().position(|r| r.hostname == hostname) {
                    return Some(hosts.remove(pos));
                }
            }
        }
        None
    }
}

/// One published view of the whole fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub buckets: BTreeMap<String, ResourceTypeBucket>,
    pub out_of_stock: OutOfStockBucket,
    pub generated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Total hosts across all productive buckets.
    pub fn bucketed_host_count(&self) -> usize {
        self.buckets.values().map(|b| b.host_count()).sum()
    }

    /// Productive hosts plus out-of-stock hosts.
    pub fn accounted_total(&self) -> usize {
        self.bucketed_host_count() + self.out_of_stock.len()
    }

    pub fn find_host(&self, hostname: &str) -> Option<&HostRecord> {
        self.buckets
            .values()
            .find_map(|b| b.find_host(hostname))
            .or_else(|| self.out_of_stock.find(hostname).map(|h| &h.record))
    }

    pub fn find_host_mut(&mut self, hostname: &str) -> Option<&mut HostRecord> {
        // Two passes keep the borrow checker happy across bucket kinds.
        if self.buckets.values().any(|b| b.find_host(hostname).is_some()) {
            return self
                .buckets
                .values_mut()
                .find_map(|b| b.find_host_mut(hostname));
        }
        self.out_of_stock
            .hosts
            .iter_mut()
            .find(|h| h.record.hostname == hostname)
            .map(|h| &mut h.record)
    }
}

/// Cache observability data for the route layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub dataset_count: usize,
    pub age_seconds: u64,
    pub ttl_seconds: u64,
}

/// Identity of one of the five inventory sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Devices,
    Aggregates,
    VmCounts,
    GpuUsage,
    Services,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Devices => "devices",
            SourceKind::Aggregates => "aggregates",
            SourceKind::VmCounts => "vm_counts",
            SourceKind::GpuUsage => "gpu_usage",
            SourceKind::Services => "services",
        };
        write!(f, "{}", s)
    }
}

/// Timing and error status for one source fetch within a collection cycle.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub kind: SourceKind,
    pub elapsed: std::time::Duration,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

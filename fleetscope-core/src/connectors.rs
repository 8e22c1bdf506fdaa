//! Trait boundaries for the five inventory backends.
//!
//! The concrete clients (directory API, membership service, per-host probes,
//! service health registry) live outside this crate; components here depend
//! on these interfaces so the pipeline stays testable with in-memory fakes.

use async_trait::async_trait;

use crate::error::FleetResult;
use crate::types::{AggregateInfo, ComputeService, DevicePage, GpuUsage};

/// The device directory holding the authoritative hardware inventory.
///
/// Listings are paginated; the collector drains pages until a short page.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self, offset: usize, limit: usize) -> FleetResult<DevicePage>;
}

/// The compute-cluster membership service mapping aggregates to hosts.
#[async_trait]
pub trait MembershipService: Send + Sync {
    async fn list_aggregates(&self) -> FleetResult<Vec<AggregateInfo>>;
}

/// Per-host VM count probe.
#[async_trait]
pub trait VmCountProbe: Send + Sync {
    async fn count_vms(&self, hostname: &str) -> FleetResult<u32>;
}

/// Per-host GPU utilization probe.
#[async_trait]
pub trait GpuUsageProbe: Send + Sync {
    async fn gpu_usage(&self, hostname: &str) -> FleetResult<GpuUsage>;
}

/// Registry reporting whether each host's compute service is enabled.
#[async_trait]
pub trait ServiceHealthRegistry: Send + Sync {
    async fn list_compute_services(&self) -> FleetResult<Vec<ComputeService>>;
}

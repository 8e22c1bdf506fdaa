//! Concurrent collection of the five inventory sources.
//!
//! One refresh cycle issues every source query concurrently with independent
//! timeouts. A failing source degrades to its empty default and is reported
//! in the per-source outcomes; it never aborts the other sources. There are
//! no intra-cycle retries; freshness recovers on the next refresh.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::common::async_utils::{concurrent_map, with_timeout};
use crate::config::CollectorConfig;
use crate::connectors::{
    DeviceDirectory, GpuUsageProbe, MembershipService, ServiceHealthRegistry, VmCountProbe,
};
use crate::error::{FleetError, FleetResult};
use crate::types::{
    AggregateInfo, ComputeService, DeviceRecord, GpuUsage, SourceKind, SourceOutcome,
};

/// Joined result set of one collection cycle.
#[derive(Debug, Clone, Default)]
pub struct SourceCollection {
    pub devices: Vec<DeviceRecord>,
    pub aggregates: Vec<AggregateInfo>,
    pub vm_counts: BTreeMap<String, u32>,
    pub gpu_usage: BTreeMap<String, GpuUsage>,
    pub services: BTreeMap<String, ComputeService>,
    pub outcomes: Vec<SourceOutcome>,
}

impl SourceCollection {
    /// True when not a single source produced data this cycle.
    pub fn hard_failure(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(|o| !o.succeeded())
    }

    /// Count of GPU-tagged devices in the full directory listing.
    pub fn gpu_device_count(&self) -> usize {
        self.devices.iter().filter(|d| d.is_gpu_tagged()).count()
    }
}

/// Fans out the five source queries and joins their results.
pub struct Collector {
    devices: Arc<dyn DeviceDirectory>,
    membership: Arc<dyn MembershipService>,
    vm_probe: Arc<dyn VmCountProbe>,
    gpu_probe: Arc<dyn GpuUsageProbe>,
    health: Arc<dyn ServiceHealthRegistry>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(
        devices: Arc<dyn DeviceDirectory>,
        membership: Arc<dyn MembershipService>,
        vm_probe: Arc<dyn VmCountProbe>,
        gpu_probe: Arc<dyn GpuUsageProbe>,
        health: Arc<dyn ServiceHealthRegistry>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            devices,
            membership,
            vm_probe,
            gpu_probe,
            health,
            config,
        }
    }

    /// Run all five source queries concurrently and join the results.
    pub async fn collect_all(&self) -> SourceCollection {
        let cycle_started = Instant::now();

        let devices_fut = self.timed(SourceKind::Devices, self.drain_devices());
        let aggregates_fut = self.timed(SourceKind::Aggregates, async {
            self.membership.list_aggregates().await
        });
        let vm_fut = self.timed(SourceKind::VmCounts, self.sweep_vm_counts());
        let gpu_fut = self.timed(SourceKind::GpuUsage, self.sweep_gpu_usage());
        let services_fut = self.timed(SourceKind::Services, self.fetch_services());

        let (devices, aggregates, vm_counts, gpu_usage, services) =
            tokio::join!(devices_fut, aggregates_fut, vm_fut, gpu_fut, services_fut);

        let mut collection = SourceCollection::default();
        collection.devices = unwrap_source(devices, &mut collection.outcomes);
        collection.aggregates = unwrap_source(aggregates, &mut collection.outcomes);
        collection.vm_counts = unwrap_source(vm_counts, &mut collection.outcomes);
        collection.gpu_usage = unwrap_source(gpu_usage, &mut collection.outcomes);
        collection.services = unwrap_source(services, &mut collection.outcomes);

        info!(
            elapsed_ms = cycle_started.elapsed().as_millis() as u64,
            devices = collection.devices.len(),
            aggregates = collection.aggregates.len(),
            probed_hosts = collection.vm_counts.len(),
            failed_sources = collection.outcomes.iter().filter(|o| !o.succeeded()).count(),
            "collection cycle finished"
        );
        collection
    }

    /// Wrap a source fetch with its timeout and wall-clock measurement.
    async fn timed<T>(
        &self,
        kind: SourceKind,
        fetch: impl std::future::Future<Output = FleetResult<T>>,
    ) -> (SourceKind, FleetResult<T>, Duration) {
        let started = Instant::now();
        let result = with_timeout(fetch, self.config.source_timeout, &kind.to_string())
            .await
            .and_then(|inner| inner);
        (kind, result, started.elapsed())
    }

    /// Drain the paginated device directory listing.
    ///
    /// A failure after the first page means the listing is incomplete; the
    /// whole source degrades rather than publishing a truncated inventory.
    async fn drain_devices(&self) -> FleetResult<Vec<DeviceRecord>> {
        let limit = self.config.page_size;
        let mut all = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .devices
                .list_devices(offset, limit)
                .await
                .map_err(|e| {
                    if offset == 0 {
                        e
                    } else {
                        FleetError::PartialData {
                            source_name: SourceKind::Devices.to_string(),
                            message: format!("pagination stopped at offset {}: {}", offset, e),
                        }
                    }
                })?;
            let fetched = page.results.len();
            all.extend(page.results);
            if fetched < limit {
                return Ok(all);
            }
            offset += limit;
        }
    }

    async fn fetch_services(&self) -> FleetResult<BTreeMap<String, ComputeService>> {
        let services = self.health.list_compute_services().await?;
        Ok(services
            .into_iter()
            .map(|s| (s.hostname.clone(), s))
            .collect())
    }

    /// Hostnames across all aggregates, the population for per-host probes.
    async fn aggregate_hostnames(&self) -> FleetResult<Vec<String>> {
        let aggregates = self.membership.list_aggregates().await?;
        let unique: BTreeSet<String> = aggregates
            .into_iter()
            .flat_map(|a| a.hostnames)
            .collect();
        Ok(unique.into_iter().collect())
    }

    async fn sweep_vm_counts(&self) -> FleetResult<BTreeMap<String, u32>> {
        let hostnames = self.aggregate_hostnames().await?;
        let probe = Arc::clone(&self.vm_probe);
        let probe_timeout = self.config.probe_timeout;
        let results = concurrent_map(
            hostnames,
            self.config.probe_concurrency,
            move |hostname: String| {
                let probe = Arc::clone(&probe);
                async move {
                    let count = with_timeout(
                        probe.count_vms(&hostname),
                        probe_timeout,
                        "vm count probe",
                    )
                    .await
                    .and_then(|inner| inner)
                    .unwrap_or_else(|e| {
                        warn!(host = %hostname, error = %e, "vm count probe failed, using 0");
                        0
                    });
                    (hostname, count)
                }
            },
        )
        .await;
        Ok(results.into_iter().collect())
    }

    async fn sweep_gpu_usage(&self) -> FleetResult<BTreeMap<String, GpuUsage>> {
        let hostnames = self.aggregate_hostnames().await?;
        let probe = Arc::clone(&self.gpu_probe);
        let probe_timeout = self.config.probe_timeout;
        let results = concurrent_map(
            hostnames,
            self.config.probe_concurrency,
            move |hostname: String| {
                let probe = Arc::clone(&probe);
                async move {
                    let usage = with_timeout(
                        probe.gpu_usage(&hostname),
                        probe_timeout,
                        "gpu usage probe",
                    )
                    .await
                    .and_then(|inner| inner)
                    .unwrap_or_else(|e| {
                        warn!(host = %hostname, error = %e, "gpu usage probe failed, using defaults");
                        GpuUsage::default_for_host(&hostname)
                    });
                    (hostname, usage)
                }
            },
        )
        .await;
        Ok(results.into_iter().collect())
    }
}

/// Record the source outcome and degrade a failed source to its default.
fn unwrap_source<T: Default>(
    fetched: (SourceKind, FleetResult<T>, Duration),
    outcomes: &mut Vec<SourceOutcome>,
) -> T {
    let (kind, result, elapsed) = fetched;
    match result {
        Ok(value) => {
            info!(source = %kind, elapsed_ms = elapsed.as_millis() as u64, "source fetched");
            outcomes.push(SourceOutcome {
                kind,
                elapsed,
                error: None,
            });
            value
        }
        Err(e) => {
            warn!(
                source = %kind,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "source unavailable, continuing with empty data"
            );
            outcomes.push(SourceOutcome {
                kind,
                elapsed,
                error: Some(e.to_string()),
            });
            T::default()
        }
    }
}

//! In-memory connector fakes shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleetscope_core::classifier::ClassificationRules;
use fleetscope_core::collector::Collector;
use fleetscope_core::config::FleetConfig;
use fleetscope_core::connectors::{
    DeviceDirectory, GpuUsageProbe, MembershipService, ServiceHealthRegistry, VmCountProbe,
};
use fleetscope_core::error::{FleetError, FleetResult};
use fleetscope_core::snapshot_cache::SnapshotService;
use fleetscope_core::types::{
    AggregateInfo, ComputeService, DevicePage, DeviceRecord, GpuUsage, LifecycleStatus,
};

fn unavailable(source: &str) -> FleetError {
    FleetError::SourceUnavailable {
        source_name: source.to_string(),
        message: "injected failure".to_string(),
    }
}

pub struct MockDirectory {
    pub devices: Vec<DeviceRecord>,
    pub calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub fail: AtomicBool,
    /// Fail the page starting at this offset, simulating a truncated drain.
    pub fail_at_offset: Option<usize>,
    pub delay: Duration,
}

impl MockDirectory {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        Self {
            devices,
            calls: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            fail_at_offset: None,
            delay: Duration::ZERO,
        }
    }

    /// Pipeline executions observed via first-page fetches.
    pub fn listings(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceDirectory for MockDirectory {
    async fn list_devices(&self, offset: usize, limit: usize) -> FleetResult<DevicePage> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if offset == 0 {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("devices"));
        }
        if let Some(fail_at) = self.fail_at_offset {
            if offset >= fail_at {
                return Err(unavailable("devices"));
            }
        }
        let end = (offset + limit).min(self.devices.len());
        let results = if offset >= self.devices.len() {
            Vec::new()
        } else {
            self.devices[offset..end].to_vec()
        };
        Ok(DevicePage { results })
    }
}

pub struct MockMembership {
    pub aggregates: Vec<AggregateInfo>,
    pub fail: AtomicBool,
}

impl MockMembership {
    pub fn new(aggregates: Vec<AggregateInfo>) -> Self {
        Self {
            aggregates,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MembershipService for MockMembership {
    async fn list_aggregates(&self) -> FleetResult<Vec<AggregateInfo>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("aggregates"));
        }
        Ok(self.aggregates.clone())
    }
}

pub struct MockVmCounts {
    pub counts: BTreeMap<String, u32>,
    pub fail: AtomicBool,
}

impl MockVmCounts {
    pub fn new(counts: BTreeMap<String, u32>) -> Self {
        Self {
            counts,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VmCountProbe for MockVmCounts {
    async fn count_vms(&self, hostname: &str) -> FleetResult<u32> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("vm_counts"));
        }
        Ok(self.counts.get(hostname).copied().unwrap_or(0))
    }
}

pub struct MockGpuUsage {
    pub usage: BTreeMap<String, GpuUsage>,
    pub fail: AtomicBool,
}

impl MockGpuUsage {
    pub fn new(usage: BTreeMap<String, GpuUsage>) -> Self {
        Self {
            usage,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl GpuUsageProbe for MockGpuUsage {
    async fn gpu_usage(&self, hostname: &str) -> FleetResult<GpuUsage> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("gpu_usage"));
        }
        Ok(self
            .usage
            .get(hostname)
            .copied()
            .unwrap_or_else(|| GpuUsage::default_for_host(hostname)))
    }
}

pub struct MockHealth {
    pub services: Vec<ComputeService>,
    pub fail: AtomicBool,
}

impl MockHealth {
    pub fn new(services: Vec<ComputeService>) -> Self {
        Self {
            services,
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServiceHealthRegistry for MockHealth {
    async fn list_compute_services(&self) -> FleetResult<Vec<ComputeService>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(unavailable("services"));
        }
        Ok(self.services.clone())
    }
}

pub fn gpu_device(hostname: &str, status: LifecycleStatus) -> DeviceRecord {
    DeviceRecord {
        hostname: hostname.to_string(),
        status,
        tenant: Some("Acme".to_string()),
        owner_group: Some("Investors".to_string()),
        nvlink: false,
        tags: vec!["nvidia-h100-pcie".to_string()],
        site: Some("CA1".to_string()),
        rack: Some("R12".to_string()),
        id: None,
        url: None,
    }
}

pub fn aggregate(name: &str, hostnames: &[&str]) -> AggregateInfo {
    AggregateInfo {
        name: name.to_string(),
        hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
    }
}

pub fn service(hostname: &str, enabled: bool) -> ComputeService {
    ComputeService {
        hostname: hostname.to_string(),
        enabled,
        state: if enabled { "up" } else { "down" }.to_string(),
    }
}

/// A full service wired to mocks, with handles kept for assertions.
pub struct Fixture {
    pub directory: Arc<MockDirectory>,
    pub membership: Arc<MockMembership>,
    pub vm_counts: Arc<MockVmCounts>,
    pub gpu_usage: Arc<MockGpuUsage>,
    pub health: Arc<MockHealth>,
    pub service: Arc<SnapshotService>,
}

impl Fixture {
    pub fn fail_all_sources(&self) {
        self.directory.fail.store(true, Ordering::SeqCst);
        self.membership.fail.store(true, Ordering::SeqCst);
        self.vm_counts.fail.store(true, Ordering::SeqCst);
        self.gpu_usage.fail.store(true, Ordering::SeqCst);
        self.health.fail.store(true, Ordering::SeqCst);
    }
}

pub struct FixtureBuilder {
    devices: Vec<DeviceRecord>,
    aggregates: Vec<AggregateInfo>,
    vm_counts: BTreeMap<String, u32>,
    gpu_usage: BTreeMap<String, GpuUsage>,
    services: Vec<ComputeService>,
    config: FleetConfig,
    directory_delay: Duration,
    fail_directory_at_offset: Option<usize>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            aggregates: Vec::new(),
            vm_counts: BTreeMap::new(),
            gpu_usage: BTreeMap::new(),
            services: Vec::new(),
            config: FleetConfig::default(),
            directory_delay: Duration::ZERO,
            fail_directory_at_offset: None,
        }
    }

    pub fn devices(mut self, devices: Vec<DeviceRecord>) -> Self {
        self.devices = devices;
        self
    }

    pub fn aggregates(mut self, aggregates: Vec<AggregateInfo>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn vm_count(mut self, hostname: &str, count: u32) -> Self {
        self.vm_counts.insert(hostname.to_string(), count);
        self
    }

    pub fn gpu_usage(mut self, hostname: &str, used: u32, capacity: u32) -> Self {
        self.gpu_usage
            .insert(hostname.to_string(), GpuUsage { used, capacity });
        self
    }

    pub fn services(mut self, services: Vec<ComputeService>) -> Self {
        self.services = services;
        self
    }

    pub fn config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.collector.page_size = page_size;
        self
    }

    pub fn directory_delay(mut self, delay: Duration) -> Self {
        self.directory_delay = delay;
        self
    }

    pub fn fail_directory_at_offset(mut self, offset: usize) -> Self {
        self.fail_directory_at_offset = Some(offset);
        self
    }

    pub fn build(self) -> Fixture {
        let mut directory = MockDirectory::new(self.devices);
        directory.delay = self.directory_delay;
        directory.fail_at_offset = self.fail_directory_at_offset;
        let directory = Arc::new(directory);
        let membership = Arc::new(MockMembership::new(self.aggregates));
        let vm_counts = Arc::new(MockVmCounts::new(self.vm_counts));
        let gpu_usage = Arc::new(MockGpuUsage::new(self.gpu_usage));
        let health = Arc::new(MockHealth::new(self.services));

        let collector = Collector::new(
            Arc::clone(&directory) as Arc<dyn DeviceDirectory>,
            Arc::clone(&membership) as Arc<dyn MembershipService>,
            Arc::clone(&vm_counts) as Arc<dyn VmCountProbe>,
            Arc::clone(&gpu_usage) as Arc<dyn GpuUsageProbe>,
            Arc::clone(&health) as Arc<dyn ServiceHealthRegistry>,
            self.config.collector.clone(),
        );
        let rules = ClassificationRules::from_config(&self.config.classification);
        let service = Arc::new(SnapshotService::new(
            collector,
            rules,
            self.config.cache.clone(),
        ));

        Fixture {
            directory,
            membership,
            vm_counts,
            gpu_usage,
            health,
            service,
        }
    }
}

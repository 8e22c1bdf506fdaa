//! Full-inventory reconciliation.
//!
//! Checks that every GPU-tagged directory device is accounted for by the
//! snapshot: productive bucket totals plus out-of-stock. A mismatch is a
//! diagnostic, never a publication gate — the snapshot still goes out.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{DeviceRecord, Snapshot};

/// Result of comparing a snapshot against the full directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// GPU-tagged devices in the full directory listing.
    pub directory_gpu_devices: usize,
    /// Hosts across all productive buckets.
    pub bucketed_hosts: usize,
    /// Hosts in the out-of-stock bucket.
    pub out_of_stock_hosts: usize,
    /// Productive host count per resource type.
    pub per_bucket: BTreeMap<String, usize>,
    /// Out-of-stock host count per lifecycle status.
    pub status_breakdown: BTreeMap<String, usize>,
    pub consistent: bool,
}

impl ReconciliationReport {
    pub fn accounted_total(&self) -> usize {
        self.bucketed_hosts + self.out_of_stock_hosts
    }
}

/// Validate bucket totals against the full directory inventory.
pub fn reconcile(snapshot: &Snapshot, devices: &[DeviceRecord]) -> ReconciliationReport {
    let directory_gpu_devices = devices.iter().filter(|d| d.is_gpu_tagged()).count();
    let bucketed_hosts = snapshot.bucketed_host_count();
    let out_of_stock_hosts = snapshot.out_of_stock.len();

    let per_bucket = snapshot
        .buckets
        .iter()
        .map(|(resource_type, bucket)| (resource_type.clone(), bucket.host_count()))
        .collect();

    let mut status_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    for host in &snapshot.out_of_stock.hosts {
        *status_breakdown
            .entry(host.record.status.as_str().to_string())
            .or_default() += 1;
    }

    let report = ReconciliationReport {
        directory_gpu_devices,
        bucketed_hosts,
        out_of_stock_hosts,
        per_bucket,
        status_breakdown,
        consistent: bucketed_hosts + out_of_stock_hosts == directory_gpu_devices,
    };

    if report.consistent {
        debug!(
            accounted = report.accounted_total(),
            "inventory reconciliation consistent"
        );
    } else {
        warn!(
            directory_gpu_devices = report.directory_gpu_devices,
            bucketed_hosts = report.bucketed_hosts,
            out_of_stock_hosts = report.out_of_stock_hosts,
            per_bucket = ?report.per_bucket,
            status_breakdown = ?report.status_breakdown,
            "inventory reconciliation mismatch, publishing snapshot anyway"
        );
    }
    report
}

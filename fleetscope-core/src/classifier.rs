//! Aggregate classification and snapshot assembly.
//!
//! Turns the joined source results into a published [`Snapshot`]: every host
//! lands in exactly one resource-type pool or in the out-of-stock bucket with
//! exactly one reason. Classification is a pure function of the joined
//! inputs; hosts are visited in sorted order so the result is independent of
//! source arrival order.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::collector::SourceCollection;
use crate::config::ClassificationConfig;
use crate::types::{
    DeviceRecord, GpuUsage, HostRecord, LifecycleStatus, OutOfStockBucket, OutOfStockHost,
    OutOfStockReason, Pool, ResourceTypeBucket, Snapshot,
};

/// Canonical `<TYPE>[-variant]-spot` naming, variant being a generation
/// token like `-n3` with an optional `-NVLink` marker.
static SPOT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ty>[A-Z0-9-]+?)(?:-n\d+(?:-NVLink)?)?-spot$").expect("valid spot pattern")
});

static RUNPOD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ty>[A-Z0-9-]+?)(?:-n\d+(?:-NVLink)?)?-runpod$")
        .expect("valid runpod pattern")
});

static ONDEMAND_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ty>[A-Z0-9-]+?)(?:-n\d+(?:-NVLink)?)?$").expect("valid ondemand pattern")
});

static CONTRACT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[Cc]ontract-").expect("valid contract pattern"));

/// `24xA100`-style count suffix used by contract aggregate names.
static COUNT_SUFFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+x(?P<ty>[A-Z0-9-]+)").expect("valid count suffix pattern"));

/// Hardware tokens recognized inside contract aggregate names.
const HARDWARE_TOKENS: [&str; 5] = ["H100", "A100", "RTX-A6000", "L40", "A4000"];

/// Where a rule takes the resource type from once its pattern matches.
#[derive(Debug, Clone, Copy)]
enum TypeSource {
    /// The `ty` capture group of the rule's own pattern.
    Capture,
    /// Hardware tokens embedded in the aggregate name, falling back to the
    /// configured default type.
    HardwareToken,
}

#[derive(Debug, Clone)]
struct AggregateRule {
    pattern: Regex,
    pool: Pool,
    type_source: TypeSource,
}

/// A productive (resource type, pool) assignment for an aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub resource_type: String,
    pub pool: Pool,
}

/// Ordered, data-driven aggregate naming rules. First match wins; an
/// aggregate matching no rule is non-productive.
#[derive(Debug, Clone)]
pub struct ClassificationRules {
    rules: Vec<AggregateRule>,
    default_resource_type: String,
}

impl ClassificationRules {
    pub fn from_config(config: &ClassificationConfig) -> Self {
        // Pool-suffixed rules come before the bare ondemand rule, which
        // would otherwise never let them match.
        let rules = vec![
            AggregateRule {
                pattern: SPOT_PATTERN.clone(),
                pool: Pool::Spot,
                type_source: TypeSource::Capture,
            },
            AggregateRule {
                pattern: RUNPOD_PATTERN.clone(),
                pool: Pool::Runpod,
                type_source: TypeSource::Capture,
            },
            AggregateRule {
                pattern: CONTRACT_PATTERN.clone(),
                pool: Pool::Contract,
                type_source: TypeSource::HardwareToken,
            },
            AggregateRule {
                pattern: ONDEMAND_PATTERN.clone(),
                pool: Pool::Ondemand,
                type_source: TypeSource::Capture,
            },
        ];
        Self {
            rules,
            default_resource_type: config.default_resource_type.clone(),
        }
    }

    /// Classify an aggregate name into its productive assignment, or `None`
    /// for non-productive ("tempest"-style) aggregates.
    pub fn classify_aggregate(&self, name: &str) -> Option<Assignment> {
        for rule in &self.rules {
            let Some(captures) = rule.pattern.captures(name) else {
                continue;
            };
            let resource_type = match rule.type_source {
                TypeSource::Capture => captures
                    .name("ty")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_else(|| self.default_resource_type.clone()),
                TypeSource::HardwareToken => self.infer_hardware_type(name),
            };
            return Some(Assignment {
                resource_type,
                pool: rule.pool,
            });
        }
        None
    }

    fn infer_hardware_type(&self, name: &str) -> String {
        if let Some(token) = HARDWARE_TOKENS.iter().find(|t| name.contains(*t)) {
            return token.to_string();
        }
        if let Some(captures) = COUNT_SUFFIX_PATTERN.captures(name) {
            if let Some(ty) = captures.name("ty") {
                return ty.as_str().to_string();
            }
        }
        warn!(
            aggregate = name,
            fallback = %self.default_resource_type,
            "no hardware token in contract aggregate name, using default type"
        );
        self.default_resource_type.clone()
    }
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self::from_config(&ClassificationConfig::default())
    }
}

/// Assemble a snapshot from the joined source results.
pub fn classify(collection: &SourceCollection, rules: &ClassificationRules) -> Snapshot {
    // Aggregate name -> productive assignment (or None).
    let mut assignments: BTreeMap<String, Option<Assignment>> = BTreeMap::new();
    for aggregate in &collection.aggregates {
        assignments
            .entry(aggregate.name.clone())
            .or_insert_with(|| rules.classify_aggregate(&aggregate.name));
    }

    // Host -> every aggregate it belongs to, both kept sorted.
    let mut memberships: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for aggregate in &collection.aggregates {
        for hostname in &aggregate.hostnames {
            memberships
                .entry(hostname.clone())
                .or_default()
                .insert(aggregate.name.clone());
        }
    }

    // Directory lookup; first row wins on duplicate hostnames.
    let mut directory: BTreeMap<&str, &DeviceRecord> = BTreeMap::new();
    for device in &collection.devices {
        directory.entry(device.hostname.as_str()).or_insert(device);
    }

    // Every productive aggregate gets its (possibly empty) slot so that
    // migration patches can target it even before it holds hosts.
    let mut buckets: BTreeMap<String, ResourceTypeBucket> = BTreeMap::new();
    for (name, assignment) in &assignments {
        if let Some(assignment) = assignment {
            buckets
                .entry(assignment.resource_type.clone())
                .or_insert_with(|| ResourceTypeBucket::new(assignment.resource_type.clone()))
                .register_aggregate(assignment.pool, name);
        }
    }

    // Place each productive host; memberships iterate in hostname order.
    for (hostname, aggregates) in &memberships {
        let mut productive = aggregates
            .iter()
            .filter_map(|name| match assignments.get(name) {
                Some(Some(assignment)) => Some((name.as_str(), assignment)),
                _ => None,
            });
        let Some((aggregate, assignment)) = productive.next() else {
            continue;
        };
        if productive.next().is_some() {
            warn!(
                host = hostname.as_str(),
                aggregate,
                "host belongs to multiple productive aggregates, keeping the first"
            );
        }

        let device = directory.get(hostname.as_str()).copied();
        let status = device
            .map(|d| d.status)
            .unwrap_or(LifecycleStatus::Active);
        let enabled = collection
            .services
            .get(hostname)
            .map(|s| s.enabled)
            .unwrap_or(true);
        if !status.is_active() || !enabled {
            // Out-of-stock classification below picks these up.
            continue;
        }

        let record = merge_host_record(
            hostname,
            Some(aggregate),
            Some(assignment),
            device,
            collection,
            status,
            enabled,
        );
        if let Some(bucket) = buckets.get_mut(&assignment.resource_type) {
            bucket.insert_host(assignment.pool, aggregate, record);
        }
    }

    // Every GPU-tagged directory device that is not productive gets exactly
    // one out-of-stock reason, checked in fixed precedence order.
    let mut out_of_stock = OutOfStockBucket::default();
    for (hostname, device) in &directory {
        if !device.is_gpu_tagged() {
            continue;
        }
        let enabled = collection
            .services
            .get(*hostname)
            .map(|s| s.enabled)
            .unwrap_or(true);
        let membership = memberships.get(*hostname);
        let in_productive = membership
            .map(|aggregates| {
                aggregates
                    .iter()
                    .any(|name| matches!(assignments.get(name), Some(Some(_))))
            })
            .unwrap_or(false);

        if device.status.is_active() && enabled && in_productive {
            continue;
        }

        let reason = if !device.status.is_active() {
            OutOfStockReason::NetboxNonActive
        } else if !enabled {
            OutOfStockReason::ComputeDisabled
        } else if membership.map(|m| !m.is_empty()).unwrap_or(false) {
            OutOfStockReason::InTempest
        } else {
            OutOfStockReason::NotInOpenstack
        };

        let aggregate = membership.and_then(|m| m.iter().next().map(String::as_str));
        let record = merge_host_record(
            hostname,
            aggregate,
            None,
            Some(*device),
            collection,
            device.status,
            enabled,
        );
        debug!(host = *hostname, reason = %reason, "host excluded from productive capacity");
        out_of_stock.hosts.push(OutOfStockHost { record, reason });
    }

    Snapshot {
        buckets,
        out_of_stock,
        generated_at: chrono::Utc::now(),
    }
}

fn merge_host_record(
    hostname: &str,
    aggregate: Option<&str>,
    assignment: Option<&Assignment>,
    device: Option<&DeviceRecord>,
    collection: &SourceCollection,
    status: LifecycleStatus,
    compute_enabled: bool,
) -> HostRecord {
    let usage = collection
        .gpu_usage
        .get(hostname)
        .copied()
        .unwrap_or_else(|| GpuUsage::default_for_host(hostname));
    HostRecord {
        hostname: hostname.to_string(),
        aggregate: aggregate.map(str::to_string),
        resource_type: assignment.map(|a| a.resource_type.clone()),
        pool: assignment.map(|a| a.pool),
        tenant: device
            .and_then(|d| d.tenant.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        owner_group: device
            .and_then(|d| d.owner_group.clone())
            .unwrap_or_else(|| "Investors".to_string()),
        nvlink: device.map(|d| d.nvlink).unwrap_or(false),
        directory_id: device.and_then(|d| d.id),
        directory_url: device.and_then(|d| d.url.clone()),
        vm_count: collection.vm_counts.get(hostname).copied().unwrap_or(0),
        gpu_used: usage.used,
        gpu_capacity: usage.capacity,
        status,
        compute_enabled,
        gpu_tagged: device.map(|d| d.is_gpu_tagged()).unwrap_or(false),
    }
}

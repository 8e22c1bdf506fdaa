//! TTL snapshot cache with single-flight refresh and incremental patches.
//!
//! One service object owns the collector, the rule table and the cached
//! entry behind a single lock. Readers of a fresh snapshot return without
//! I/O; stale readers either await the in-flight refresh through a watch
//! channel or run the pipeline themselves. Two narrow patch operations
//! mutate the published snapshot in place so the UI can reflect a count
//! bump or a membership move without a full re-fetch.

use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::classifier::{classify, ClassificationRules};
use crate::collector::Collector;
use crate::config::CacheConfig;
use crate::error::{FleetError, FleetResult};
use crate::reconciler::reconcile;
use crate::types::{CacheStats, Snapshot};

/// A published snapshot plus its freshness bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: Snapshot,
    created_at: Instant,
}

impl CacheEntry {
    fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            created_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entry: Option<CacheEntry>,
    /// Present while a refresh is running; waiters subscribe to it.
    inflight: Option<watch::Receiver<()>>,
}

/// What a caller found when it decided how to obtain a snapshot.
enum RefreshRole {
    /// This caller runs the pipeline and wakes the waiters.
    Leader(watch::Sender<()>),
    /// Another caller is already refreshing; await its signal.
    Waiter(watch::Receiver<()>),
}

/// The cache service owning the whole pipeline.
pub struct SnapshotService {
    collector: Collector,
    rules: ClassificationRules,
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl SnapshotService {
    pub fn new(collector: Collector, rules: ClassificationRules, config: CacheConfig) -> Self {
        Self {
            collector,
            rules,
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Return the current snapshot, refreshing it if stale or absent.
    ///
    /// Fresh entries are served without touching any source. Concurrent
    /// callers of a stale cache share one pipeline execution; a waiter that
    /// outlives `waiter_timeout` falls back to an independent refresh.
    pub async fn get(&self, force_refresh: bool) -> FleetResult<Snapshot> {
        if !force_refresh {
            let state = self.state.read().await;
            if let Some(entry) = &state.entry {
                if entry.created_at.elapsed() < self.config.ttl {
                    return Ok(entry.snapshot.clone());
                }
            }
        }

        let role = {
            let mut state = self.state.write().await;
            // Double-check after taking the write lock: another caller may
            // have refreshed while we waited for it.
            if !force_refresh {
                if let Some(entry) = &state.entry {
                    if entry.created_at.elapsed() < self.config.ttl {
                        return Ok(entry.snapshot.clone());
                    }
                }
            }
            match &state.inflight {
                Some(rx) => RefreshRole::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(());
                    state.inflight = Some(rx);
                    RefreshRole::Leader(tx)
                }
            }
        };

        match role {
            RefreshRole::Leader(tx) => {
                let refreshed = self.run_pipeline().await;
                let result = {
                    let mut state = self.state.write().await;
                    state.inflight = None;
                    self.publish_or_serve_stale(&mut state, refreshed)
                };
                // Wake waiters only after the entry is visible.
                let _ = tx.send(());
                result
            }
            RefreshRole::Waiter(rx) => self.await_inflight(rx).await,
        }
    }

    /// Bypass the freshness check; still shares any in-flight refresh.
    pub async fn force_refresh(&self) -> FleetResult<Snapshot> {
        self.get(true).await
    }

    /// Drop the cached snapshot. Returns the number of discarded datasets.
    /// Does not trigger a refresh.
    pub async fn clear(&self) -> usize {
        let mut state = self.state.write().await;
        let cleared = state.entry.is_some() as usize;
        state.entry = None;
        info!(cleared, "snapshot cache cleared");
        cleared
    }

    pub async fn cache_stats(&self) -> CacheStats {
        let state = self.state.read().await;
        CacheStats {
            dataset_count: state.entry.is_some() as usize,
            age_seconds: state
                .entry
                .as_ref()
                .map(|e| e.created_at.elapsed().as_secs())
                .unwrap_or(0),
            ttl_seconds: self.config.ttl.as_secs(),
        }
    }

    /// Update one host's VM count in place. Returns false when the host is
    /// not present in the cached snapshot; nothing else changes.
    pub async fn patch_vm_count(&self, hostname: &str, new_count: u32) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.entry.as_mut() else {
            return false;
        };
        match entry.snapshot.find_host_mut(hostname) {
            Some(record) => {
                debug!(
                    host = hostname,
                    previous = record.vm_count,
                    new = new_count,
                    "patched vm count"
                );
                record.vm_count = new_count;
                true
            }
            None => {
                debug!(host = hostname, "vm count patch target not found");
                false
            }
        }
    }

    /// Move a host between aggregates in the cached snapshot.
    ///
    /// Either the host fully moves from the source aggregate's list to the
    /// destination's — aggregate and pool rewritten — or, when the host or
    /// the destination aggregate cannot be found, the snapshot is left
    /// untouched and false is returned.
    pub async fn patch_migration(
        &self,
        hostname: &str,
        from_aggregate: &str,
        to_aggregate: &str,
    ) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.entry.as_mut() else {
            return false;
        };
        let snapshot = &mut entry.snapshot;

        // Resolve the destination before touching anything.
        let destination = snapshot.buckets.iter().find_map(|(resource_type, bucket)| {
            bucket
                .pool_of_aggregate(to_aggregate)
                .map(|pool| (resource_type.clone(), pool))
        });
        let Some((dest_type, dest_pool)) = destination else {
            warn!(
                host = hostname,
                to_aggregate, "migration patch: destination aggregate not cached"
            );
            return false;
        };

        let source = snapshot
            .buckets
            .iter()
            .find_map(|(resource_type, bucket)| {
                bucket
                    .pool_of_aggregate(from_aggregate)
                    .map(|pool| (resource_type.clone(), pool))
            });
        let Some((source_type, source_pool)) = source else {
            debug!(
                host = hostname,
                from_aggregate, "migration patch: host not found in source aggregate"
            );
            return false;
        };

        let removed = snapshot
            .buckets
            .get_mut(&source_type)
            .and_then(|bucket| bucket.remove_host(from_aggregate, hostname));
        let Some(mut record) = removed else {
            debug!(
                host = hostname,
                from_aggregate, "migration patch: host not found in source aggregate"
            );
            return false;
        };

        record.aggregate = Some(to_aggregate.to_string());
        record.resource_type = Some(dest_type.clone());
        record.pool = Some(dest_pool);

        match snapshot.buckets.get_mut(&dest_type) {
            Some(bucket) => {
                bucket.insert_host(dest_pool, to_aggregate, record);
                info!(
                    host = hostname,
                    from_aggregate, to_aggregate, "patched host migration"
                );
                true
            }
            None => {
                // Lock is held across the whole patch, so the destination
                // resolved above cannot vanish; restore and report failure
                // rather than drop the record if it somehow does.
                record.aggregate = Some(from_aggregate.to_string());
                record.resource_type = Some(source_type.clone());
                record.pool = Some(source_pool);
                if let Some(bucket) = snapshot.buckets.get_mut(&source_type) {
                    bucket.insert_host(source_pool, from_aggregate, record);
                }
                false
            }
        }
    }

    /// One full pipeline run: collect, classify, reconcile.
    async fn run_pipeline(&self) -> FleetResult<Snapshot> {
        let collection = self.collector.collect_all().await;
        if collection.hard_failure() {
            return Err(FleetError::CollectionFailed {
                message: "no inventory source reachable".to_string(),
            });
        }
        let snapshot = classify(&collection, &self.rules);
        reconcile(&snapshot, &collection.devices);
        Ok(snapshot)
    }

    /// Publish a refreshed snapshot, or serve the previous one when the
    /// refresh hard-failed. Only a cache that never held a snapshot
    /// surfaces the error.
    fn publish_or_serve_stale(
        &self,
        state: &mut CacheState,
        refreshed: FleetResult<Snapshot>,
    ) -> FleetResult<Snapshot> {
        match refreshed {
            Ok(snapshot) => {
                state.entry = Some(CacheEntry::new(snapshot.clone()));
                Ok(snapshot)
            }
            Err(e) => match &state.entry {
                Some(entry) => {
                    warn!(error = %e, "refresh failed, serving previous snapshot");
                    Ok(entry.snapshot.clone())
                }
                None => {
                    warn!(error = %e, "refresh failed with no previous snapshot");
                    Err(e)
                }
            },
        }
    }

    /// Wait on another caller's refresh; fall back to an independent one on
    /// timeout so a stuck refresh cannot wedge every reader.
    async fn await_inflight(&self, mut rx: watch::Receiver<()>) -> FleetResult<Snapshot> {
        debug!("refresh already in flight, waiting for its result");
        match tokio::time::timeout(self.config.waiter_timeout, rx.changed()).await {
            Ok(Ok(())) => {
                let state = self.state.read().await;
                match &state.entry {
                    Some(entry) => Ok(entry.snapshot.clone()),
                    None => Err(FleetError::SnapshotUnavailable),
                }
            }
            Ok(Err(_)) => {
                // The refreshing caller went away without publishing.
                warn!("in-flight refresh abandoned, running independent refresh");
                self.independent_refresh(true).await
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.waiter_timeout,
                    "timed out waiting for in-flight refresh, running independent refresh"
                );
                self.independent_refresh(false).await
            }
        }
    }

    /// Degraded fallback: run the pipeline outside the single-flight marker.
    /// Duplicate work, not a correctness issue.
    async fn independent_refresh(&self, clear_marker: bool) -> FleetResult<Snapshot> {
        let refreshed = self.run_pipeline().await;
        let mut state = self.state.write().await;
        if clear_marker {
            state.inflight = None;
        }
        self.publish_or_serve_stale(&mut state, refreshed)
    }
}

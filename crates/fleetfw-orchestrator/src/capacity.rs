//! Cluster capacity accounting
//!
//! A cluster's active host count is one shared counter. Hosts leave it when
//! they enter maintenance mode and rejoin on exit. [`CapacityTracker`]
//! checks and reserves under a single lock, so two batches can never both
//! pass the `min_active_hosts` check against the same headroom.

use std::collections::HashMap;
use std::sync::Arc;

use fleetfw_errors::FleetError;
use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy)]
struct ClusterSlots {
    // Active count reported when no lease was outstanding.
    baseline: usize,
    reserved: usize,
}

/// Per-cluster maintenance slot accounting.
#[derive(Debug, Clone, Default)]
pub struct CapacityTracker {
    clusters: Arc<Mutex<HashMap<String, ClusterSlots>>>,
}

impl CapacityTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `requested` hosts of `cluster` for maintenance.
    ///
    /// `reported_active` is the virtualization manager's current active
    /// count. It is taken as the baseline only while this tracker holds no
    /// lease on the cluster, since the manager may or may not already count
    /// hosts we put into maintenance.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::CapacityViolation`] when the reservation would
    /// leave fewer than `min_active` hosts active. Nothing is reserved.
    pub fn try_acquire(
        &self,
        cluster: &str,
        requested: usize,
        reported_active: usize,
        min_active: usize,
    ) -> Result<CapacityLease, FleetError> {
        let mut clusters = self.clusters.lock();
        let slots = clusters.entry(cluster.to_string()).or_default();
        if slots.reserved == 0 {
            slots.baseline = reported_active;
        }
        let active = slots.baseline.saturating_sub(slots.reserved);
        if active < requested.saturating_add(min_active) {
            warn!(
                cluster,
                active, requested, min_active, "Capacity check refused maintenance batch"
            );
            return Err(FleetError::capacity(cluster, active, requested, min_active));
        }
        slots.reserved += requested;
        debug!(cluster, reserved = slots.reserved, "Capacity reserved");
        Ok(CapacityLease {
            clusters: Arc::clone(&self.clusters),
            cluster: cluster.to_string(),
            hosts: requested,
        })
    }

    /// Hosts currently reserved in `cluster`.
    pub fn reserved(&self, cluster: &str) -> usize {
        self.clusters
            .lock()
            .get(cluster)
            .map(|s| s.reserved)
            .unwrap_or(0)
    }
}

/// Hosts held out of service; released on drop.
#[derive(Debug)]
#[must_use = "dropping the lease releases the reserved hosts"]
pub struct CapacityLease {
    clusters: Arc<Mutex<HashMap<String, ClusterSlots>>>,
    cluster: String,
    hosts: usize,
}

impl CapacityLease {
    /// Cluster the lease belongs to.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Hosts reserved.
    pub fn hosts(&self) -> usize {
        self.hosts
    }
}

impl Drop for CapacityLease {
    fn drop(&mut self) {
        let mut clusters = self.clusters.lock();
        if let Some(slots) = clusters.get_mut(&self.cluster) {
            slots.reserved = slots.reserved.saturating_sub(self.hosts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_blocks_until_released() -> Result<(), FleetError> {
        let tracker = CapacityTracker::new();
        let lease = tracker.try_acquire("prod-01", 2, 4, 2)?;
        assert_eq!(tracker.reserved("prod-01"), 2);

        // The manager now reports 2 active, but the baseline is pinned.
        assert!(matches!(
            tracker.try_acquire("prod-01", 1, 2, 2),
            Err(FleetError::CapacityViolation { active: 2, requested: 1, .. })
        ));

        drop(lease);
        assert_eq!(tracker.reserved("prod-01"), 0);
        let _again = tracker.try_acquire("prod-01", 2, 4, 2)?;
        Ok(())
    }

    #[test]
    fn test_clusters_are_independent() -> Result<(), FleetError> {
        let tracker = CapacityTracker::new();
        let _a = tracker.try_acquire("a", 1, 2, 1)?;
        let _b = tracker.try_acquire("b", 1, 2, 1)?;
        assert!(matches!(
            tracker.try_acquire("a", 1, 2, 1),
            Err(FleetError::CapacityViolation { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_concurrent_acquire_never_oversubscribes() {
        let tracker = CapacityTracker::new();
        let leases: Vec<Option<CapacityLease>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let tracker = tracker.clone();
                    s.spawn(move || tracker.try_acquire("c", 1, 10, 5).ok())
                })
                .collect();
            handles.into_iter().filter_map(|h| h.join().ok()).collect()
        });
        assert_eq!(leases.iter().flatten().count(), 5);
        assert_eq!(tracker.reserved("c"), 5);
    }
}

//! Registry of active leases.
//!
//! Every mutation runs under one mutex and ends by publishing a fresh,
//! immutable snapshot of all leases on a watch channel. The sweeper only
//! ever reads those snapshots, never the live map.

use std::collections::HashMap;
use std::sync::Arc;

use ctx_common::{ComponentIndex, Lease};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;

/// Immutable copy of the lease set, ordered by component index.
pub type LeaseSnapshot = Arc<Vec<Lease>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("component {0} already holds a lease")]
    AlreadyRegistered(ComponentIndex),
    #[error("no lease found for component {0}")]
    NotFound(ComponentIndex),
}

pub struct LeaseRegistry {
    leases: Mutex<HashMap<ComponentIndex, Lease>>,
    published: watch::Sender<LeaseSnapshot>,
    clock: Arc<dyn Clock>,
}

impl LeaseRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (published, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            leases: Mutex::new(HashMap::new()),
            published,
            clock,
        }
    }

    /// Receiver for the published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<LeaseSnapshot> {
        self.published.subscribe()
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> LeaseSnapshot {
        self.published.borrow().clone()
    }

    /// Stamps `lease` with the current time and stores it.
    ///
    /// Fails if the component already holds a lease; use [`Self::renew`].
    pub fn add(&self, mut lease: Lease) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock();
        if leases.contains_key(&lease.component_index) {
            return Err(LeaseError::AlreadyRegistered(lease.component_index));
        }
        lease.start_date = Some(self.clock.now());
        leases.insert(lease.component_index, lease.clone());
        debug!(component = %lease.component_index, slots = lease.duration_slots, "lease added");
        self.publish(&leases);
        Ok(lease)
    }

    /// Replaces the component's lease with `lease`, stamped with the current
    /// time. Renewal never registers a component that holds no lease.
    pub fn renew(&self, mut lease: Lease) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock();
        if leases.remove(&lease.component_index).is_none() {
            return Err(LeaseError::NotFound(lease.component_index));
        }
        lease.start_date = Some(self.clock.now());
        leases.insert(lease.component_index, lease.clone());
        debug!(component = %lease.component_index, slots = lease.duration_slots, "lease renewed");
        self.publish(&leases);
        Ok(lease)
    }

    pub fn remove(&self, index: ComponentIndex) -> Option<Lease> {
        let mut leases = self.leases.lock();
        let removed = leases.remove(&index);
        if removed.is_some() {
            debug!(component = %index, "lease removed");
            self.publish(&leases);
        }
        removed
    }

    /// Removes the component's lease only if `predicate` holds for it. The
    /// check and the removal happen under the same lock, so a concurrent
    /// renewal is either seen by `predicate` or fails with `NotFound`.
    pub fn remove_if(
        &self,
        index: ComponentIndex,
        predicate: impl FnOnce(&Lease) -> bool,
    ) -> Option<Lease> {
        let mut leases = self.leases.lock();
        if !leases.get(&index).is_some_and(predicate) {
            return None;
        }
        let removed = leases.remove(&index);
        debug!(component = %index, "lease removed");
        self.publish(&leases);
        removed
    }

    pub fn contains(&self, index: ComponentIndex) -> bool {
        self.leases.lock().contains_key(&index)
    }

    pub fn get(&self, index: ComponentIndex) -> Option<Lease> {
        self.leases.lock().get(&index).cloned()
    }

    pub fn len(&self) -> usize {
        self.leases.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, leases: &HashMap<ComponentIndex, Lease>) {
        let mut snapshot: Vec<Lease> = leases.values().cloned().collect();
        snapshot.sort_by_key(|lease| lease.component_index);
        self.published.send_replace(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn slot() -> chrono::Duration {
        chrono::Duration::minutes(1)
    }

    fn registry() -> (Arc<ManualClock>, LeaseRegistry) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let registry = LeaseRegistry::new(clock.clone());
        (clock, registry)
    }

    #[test]
    fn test_add_stamps_start_date_and_publishes() {
        let (clock, registry) = registry();
        let t0 = clock.now();

        let lease = registry.add(Lease::new(ComponentIndex(7), 2)).unwrap();
        assert_eq!(lease.start_date, Some(t0));
        assert!(registry.contains(ComponentIndex(7)));
        assert_eq!(registry.snapshot().as_slice(), &[lease]);
    }

    #[test]
    fn test_add_rejects_second_lease_for_component() {
        let (_, registry) = registry();
        registry.add(Lease::new(ComponentIndex(7), 2)).unwrap();
        assert_eq!(
            registry.add(Lease::new(ComponentIndex(7), 5)),
            Err(LeaseError::AlreadyRegistered(ComponentIndex(7)))
        );
        assert_eq!(registry.get(ComponentIndex(7)).unwrap().duration_slots, 2);
    }

    #[test]
    fn test_renew_resets_start_date() {
        let (clock, registry) = registry();
        let t0 = clock.now();
        registry.add(Lease::new(ComponentIndex(7), 2)).unwrap();

        clock.advance(slot());
        assert!(registry.contains(ComponentIndex(7)));
        let renewed = registry.renew(Lease::new(ComponentIndex(7), 2)).unwrap();

        assert_eq!(renewed.start_date, Some(t0 + slot()));
        assert!(registry.contains(ComponentIndex(7)));
        assert_eq!(registry.get(ComponentIndex(7)), Some(renewed));
    }

    #[test]
    fn test_repeated_renewal_keeps_one_lease_with_latest_start() {
        let (clock, registry) = registry();
        registry.add(Lease::new(ComponentIndex(3), 1)).unwrap();

        clock.advance(slot());
        registry.renew(Lease::new(ComponentIndex(3), 1)).unwrap();
        clock.advance(slot());
        let second = registry.renew(Lease::new(ComponentIndex(3), 4)).unwrap();

        assert_eq!(registry.len(), 1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].start_date, Some(clock.now()));
        assert_eq!(snapshot[0], second);
    }

    #[test]
    fn test_renew_unknown_component_fails() {
        let (_, registry) = registry();
        assert_eq!(
            registry.renew(Lease::new(ComponentIndex(1), 1)),
            Err(LeaseError::NotFound(ComponentIndex(1)))
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_republishes_reduced_set() {
        let (_, registry) = registry();
        let receiver = registry.subscribe();
        registry.add(Lease::new(ComponentIndex(2), 1)).unwrap();
        registry.add(Lease::new(ComponentIndex(1), 1)).unwrap();

        let indexes: Vec<_> = receiver.borrow().iter().map(|l| l.component_index).collect();
        assert_eq!(indexes, vec![ComponentIndex(1), ComponentIndex(2)]);

        assert!(registry.remove(ComponentIndex(2)).is_some());
        assert!(registry.remove(ComponentIndex(2)).is_none());
        let indexes: Vec<_> = receiver.borrow().iter().map(|l| l.component_index).collect();
        assert_eq!(indexes, vec![ComponentIndex(1)]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_mutation() {
        let (_, registry) = registry();
        registry.add(Lease::new(ComponentIndex(1), 1)).unwrap();
        let before = registry.snapshot();

        registry.add(Lease::new(ComponentIndex(2), 1)).unwrap();
        registry.remove(ComponentIndex(1));

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].component_index, ComponentIndex(1));
    }

    #[test]
    fn test_remove_if_rechecks_the_current_lease() {
        let (clock, registry) = registry();
        let time_slot = std::time::Duration::from_secs(60);
        registry.add(Lease::new(ComponentIndex(4), 1)).unwrap();

        clock.advance(chrono::Duration::minutes(5));
        let expired = registry.get(ComponentIndex(4)).unwrap();
        assert!(expired.is_expired(clock.now(), time_slot));

        // renewed after the stale read; the expiry check must see the new lease
        registry.renew(Lease::new(ComponentIndex(4), 1)).unwrap();
        let now = clock.now();
        assert_eq!(
            registry.remove_if(ComponentIndex(4), |lease| lease.is_expired(now, time_slot)),
            None
        );
        assert!(registry.contains(ComponentIndex(4)));

        clock.advance(chrono::Duration::minutes(2));
        let now = clock.now();
        let removed =
            registry.remove_if(ComponentIndex(4), |lease| lease.is_expired(now, time_slot));
        assert_eq!(removed.map(|lease| lease.component_index), Some(ComponentIndex(4)));
        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.remove_if(ComponentIndex(4), |_| true), None);
    }
}

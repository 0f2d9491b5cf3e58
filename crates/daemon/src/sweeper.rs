//! Periodic lease sweep.
//!
//! On every tick the sweeper takes the last lease snapshot published by the
//! [`LeaseRegistry`], keeps the leases whose component the registry owner
//! still knows, and hands that set to the owner in one call. Every live lease
//! is reported on every tick; whether a reported component is probed or
//! evicted is the owner's decision.

use std::sync::Arc;
use std::time::Duration;

use ctx_common::{ComponentIndex, RegistryOwner};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use crate::leases::{LeaseRegistry, LeaseSnapshot};

pub struct Sweeper {
    snapshot: watch::Receiver<LeaseSnapshot>,
    owner: Arc<dyn RegistryOwner>,
    period: Duration,
}

impl Sweeper {
    pub fn new(registry: &LeaseRegistry, owner: Arc<dyn RegistryOwner>, period: Duration) -> Self {
        Self {
            snapshot: registry.subscribe(),
            owner,
            period,
        }
    }

    /// Runs one sweep and returns the indexes delivered to the owner.
    pub fn sweep(&self) -> Vec<ComponentIndex> {
        // clone the Arc so the channel is not held while the owner reacts
        let snapshot = self.snapshot.borrow().clone();
        let live: Vec<ComponentIndex> = snapshot
            .iter()
            .map(|lease| lease.component_index)
            .filter(|index| self.owner.exists(*index))
            .collect();

        debug!(leases = snapshot.len(), live = live.len(), "lease sweep");
        if !live.is_empty() {
            self.owner.notify_lease_expiring(live.clone());
        }
        live
    }

    /// Sweeps at a fixed rate, first one period from now, for the lifetime
    /// of the returned task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + self.period, self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                interval.tick().await;
                self.sweep();
            }
        })
    }
}

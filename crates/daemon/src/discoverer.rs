//! The discoverer: owner of the component directory and its leases.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ctx_common::{
    ComponentDescription, ComponentIndex, Heartbeat, Lease, LeaseStatus, Query, QueryMatch,
    QueryReply, Registration, RegistryOwner,
};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::LeaseSettings;
use crate::directory::{Directory, DirectoryError};
use crate::leases::{LeaseError, LeaseRegistry};
use crate::sweeper::Sweeper;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Lease(#[from] LeaseError),
    #[error("unknown component {0}")]
    UnknownComponent(ComponentIndex),
}

pub struct Discoverer {
    directory: RwLock<Directory>,
    leases: LeaseRegistry,
    clock: Arc<dyn Clock>,
    settings: LeaseSettings,
}

impl Discoverer {
    pub fn new(settings: LeaseSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            directory: RwLock::new(Directory::new()),
            leases: LeaseRegistry::new(clock.clone()),
            clock,
            settings,
        }
    }

    pub fn leases(&self) -> &LeaseRegistry {
        &self.leases
    }

    pub fn settings(&self) -> LeaseSettings {
        self.settings
    }

    /// Adds the component to the directory and grants it a lease.
    pub fn register(&self, registration: Registration) -> Result<Lease, DiscoveryError> {
        let slots = registration.lease_slots.unwrap_or(self.settings.default_slots);
        let id = registration.id.clone();

        let mut directory = self.directory.write();
        let index = directory.insert(registration)?;
        match self.leases.add(Lease::new(index, slots)) {
            Ok(lease) => {
                info!(component = %index, id = %id, slots, "component registered");
                Ok(lease)
            }
            Err(e) => {
                directory.remove(index);
                Err(e.into())
            }
        }
    }

    /// Renews the component's lease, keeping its slot count unless the
    /// heartbeat asks for a new one.
    pub fn heartbeat(&self, heartbeat: Heartbeat) -> Result<Lease, DiscoveryError> {
        let index = heartbeat.component_index;
        // renewal must not interleave with an eviction or deregistration
        let _directory = self.directory.read();
        let slots = match heartbeat.lease_slots {
            Some(slots) => slots,
            None => {
                self.leases
                    .get(index)
                    .ok_or(LeaseError::NotFound(index))?
                    .duration_slots
            }
        };
        Ok(self.leases.renew(Lease::new(index, slots))?)
    }

    pub fn deregister(
        &self,
        index: ComponentIndex,
    ) -> Result<ComponentDescription, DiscoveryError> {
        let mut directory = self.directory.write();
        let removed = directory.remove(index);
        self.leases.remove(index);
        drop(directory);
        let description = removed.ok_or(DiscoveryError::UnknownComponent(index))?;
        info!(component = %index, id = %description.id, "component deregistered");
        Ok(description)
    }

    /// Evaluates `query` against every registered component.
    pub fn query(&self, query: &Query) -> QueryReply {
        let directory = self.directory.read();
        let matches = query
            .evaluate_all(&*directory)
            .matching()
            .filter_map(|index| {
                directory.get(index).map(|component| QueryMatch {
                    component_index: index,
                    id: component.id.clone(),
                })
            })
            .collect();
        QueryReply { matches }
    }

    /// Evaluates `query` against one component; `None` if it is unknown.
    pub fn matches(&self, index: ComponentIndex, query: &Query) -> Option<bool> {
        self.directory.read().get(index).map(|component| query.evaluate_one(component))
    }

    pub fn description(&self, index: ComponentIndex) -> Option<ComponentDescription> {
        self.directory.read().get(index).cloned()
    }

    pub fn lease_statuses(&self) -> Vec<LeaseStatus> {
        let directory = self.directory.read();
        self.leases
            .snapshot()
            .iter()
            .map(|lease| LeaseStatus {
                component_index: lease.component_index,
                component_id: directory
                    .get(lease.component_index)
                    .map(|component| component.id.clone())
                    .unwrap_or_default(),
                start_date: lease.start_date,
                end_date: lease.end_date(self.settings.time_slot),
                duration_slots: lease.duration_slots,
            })
            .collect()
    }

    pub fn sweeper(self: &Arc<Self>) -> Sweeper {
        Sweeper::new(&self.leases, self.clone(), self.settings.time_slot)
    }

    /// Starts the periodic sweep; it runs for the life of the process.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        self.sweeper().spawn()
    }

    /// Evicts the component if its current lease has expired by `now`.
    ///
    /// The directory stays write-locked while the lease registry re-checks
    /// and removes the lease, so a heartbeat that renewed in the meantime
    /// keeps the component registered.
    fn evict_if_expired(&self, index: ComponentIndex, now: DateTime<Utc>) -> bool {
        let time_slot = self.settings.time_slot;
        let mut directory = self.directory.write();
        if self
            .leases
            .remove_if(index, |lease| lease.is_expired(now, time_slot))
            .is_none()
        {
            return false;
        }
        if let Some(description) = directory.remove(index) {
            info!(component = %index, id = %description.id, "evicted component with expired lease");
        }
        true
    }
}

impl RegistryOwner for Discoverer {
    fn exists(&self, index: ComponentIndex) -> bool {
        self.directory.read().contains(index)
    }

    fn notify_lease_expiring(&self, indexes: Vec<ComponentIndex>) {
        let now = self.clock.now();
        for index in indexes {
            if !self.evict_if_expired(index, now) {
                debug!(component = %index, "lease still valid");
            }
        }
    }
}

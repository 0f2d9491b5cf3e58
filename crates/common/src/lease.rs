use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::MessageError;
use crate::tree::TreeNode;

/// Opaque handle of a registered component, stable for its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentIndex(pub u32);

impl fmt::Display for ComponentIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ComponentIndex {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ComponentIndex)
    }
}

/// Time-boxed liveness grant for one component.
///
/// A lease is valid for `duration_slots` fixed time slots counted from its
/// start date. The start date is stamped by the lease registry when the lease
/// is added or renewed, never when the value is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub component_index: ComponentIndex,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_slots: u32,
}

impl Lease {
    pub fn new(component_index: ComponentIndex, duration_slots: u32) -> Self {
        Self {
            component_index,
            start_date: None,
            duration_slots,
        }
    }

    /// Start date plus `duration_slots * time_slot`; absent until stamped.
    pub fn end_date(&self, time_slot: Duration) -> Option<DateTime<Utc>> {
        let slot = chrono::Duration::from_std(time_slot).ok()?;
        let start = self.start_date?;
        start.checked_add_signed(slot.checked_mul(i32::try_from(self.duration_slots).ok()?)?)
    }

    pub fn is_expired(&self, now: DateTime<Utc>, time_slot: Duration) -> bool {
        self.end_date(time_slot).is_some_and(|end| end < now)
    }

    pub fn to_tree(&self) -> TreeNode {
        let mut node = TreeNode::new("lease")
            .attr("componentIndex", self.component_index.to_string())
            .attr("durationSlots", self.duration_slots.to_string());
        if let Some(start) = self.start_date {
            node.set_attribute("startDate", start.to_rfc3339());
        }
        node
    }

    pub fn from_tree(node: &TreeNode) -> Result<Self, MessageError> {
        let node = node
            .find_first("lease")
            .ok_or(MessageError::Missing("lease"))?;
        let component_index = crate::messages::parse_attribute(node, "componentIndex")?;
        let duration_slots = crate::messages::parse_attribute(node, "durationSlots")?;
        let start_date = match node.attribute("startDate") {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| MessageError::Invalid {
                        field: "startDate",
                        value: raw.to_string(),
                    })?,
            ),
            None => None,
        };
        Ok(Self {
            component_index,
            start_date,
            duration_slots,
        })
    }
}

/// Listing entry for an active lease, as served by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStatus {
    pub component_index: ComponentIndex,
    pub component_id: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_slots: u32,
}

/// The party that owns registered components and decides what happens to
/// components whose lease the sweeper reports.
pub trait RegistryOwner: Send + Sync {
    /// Whether `index` still names a known component.
    fn exists(&self, index: ComponentIndex) -> bool;

    /// Receives the component indices due for a liveness check.
    fn notify_lease_expiring(&self, indexes: Vec<ComponentIndex>);
}

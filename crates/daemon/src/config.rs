//! Daemon configuration, read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5555";
pub const DEFAULT_TIME_SLOT_SECS: u64 = 60;
pub const DEFAULT_LEASE_SLOTS: u32 = 2;

pub const LISTEN_ADDR_VAR: &str = "CTX_LISTEN_ADDR";
pub const TIME_SLOT_VAR: &str = "CTX_TIME_SLOT_SECS";
pub const LEASE_SLOTS_VAR: &str = "CTX_DEFAULT_LEASE_SLOTS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Lease timing shared by the lease registry, the sweeper and the
/// registry owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    /// Lease unit and sweep period.
    pub time_slot: Duration,
    /// Slots granted when a registration does not ask for a number.
    pub default_slots: u32,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            time_slot: Duration::from_secs(DEFAULT_TIME_SLOT_SECS),
            default_slots: DEFAULT_LEASE_SLOTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub lease: LeaseSettings,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from `lookup`, falling back to the defaults
    /// for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let listen_addr = parse_var(
            &lookup,
            LISTEN_ADDR_VAR,
            DEFAULT_LISTEN_ADDR.to_string(),
            |raw| raw.parse::<SocketAddr>().map_err(|e| e.to_string()),
        )?;
        let time_slot_secs = parse_var(
            &lookup,
            TIME_SLOT_VAR,
            DEFAULT_TIME_SLOT_SECS.to_string(),
            positive::<u64>,
        )?;
        let default_slots = parse_var(
            &lookup,
            LEASE_SLOTS_VAR,
            DEFAULT_LEASE_SLOTS.to_string(),
            positive::<u32>,
        )?;

        Ok(Self {
            listen_addr,
            lease: LeaseSettings {
                time_slot: Duration::from_secs(time_slot_secs),
                default_slots,
            },
        })
    }
}

fn positive<T>(raw: &str) -> Result<T, String>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = raw.parse().map_err(|e: T::Err| e.to_string())?;
    if value == T::default() {
        return Err("must be greater than zero".to_string());
    }
    Ok(value)
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: String,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    let value = lookup(var).unwrap_or(default);
    let parsed = parse(value.trim());
    parsed.map_err(|reason| ConfigError::Invalid { var, value, reason })
}

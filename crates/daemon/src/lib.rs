//! Discovery daemon: keeps the directory of registered components, their
//! leases and the periodic sweep, and serves them over HTTP.

pub mod clock;
pub mod config;
pub mod directory;
pub mod discoverer;
pub mod leases;
pub mod routes;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, DaemonConfig, LeaseSettings};
pub use directory::{Directory, DirectoryError};
pub use discoverer::{Discoverer, DiscoveryError};
pub use leases::{LeaseError, LeaseRegistry, LeaseSnapshot};
pub use sweeper::Sweeper;

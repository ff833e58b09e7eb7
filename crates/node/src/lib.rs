//! Usage node - serves filesystem usage snapshots
//!
//! Discovers the newest snapshot per mount and keeps it open, reloading as
//! re-scans land.

pub mod config;
pub mod discovery;
pub mod provider;

pub use config::{Config, ConfigError};
pub use discovery::{find_latest_dirs, Discovered};
pub use provider::{Provider, ProviderError, State};

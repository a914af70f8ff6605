//! ContractProbe Common Library
//!
//! Shared data model, run configuration and event stream for the
//! ContractProbe contract-testing engine.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

// Re-export commonly used types
pub use config::{
    AuthConfig, BlacklistEntry, ReadinessConfig, RunConfig, RunMode, ServerFieldConfig,
};
pub use error::{Error, Result};
pub use events::{EventLog, RunEvent, Severity};
pub use types::*;

/// ContractProbe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "contractprobe.toml";

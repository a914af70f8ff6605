//! Error types for the engine
//!
//! Only run-fatal conditions are raised as [`EngineError`]. Step failures,
//! skipped dependencies and cleanup problems are recorded in the entry's
//! `TestResult` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API not ready after {waited_secs}s ({attempts} attempts)")]
    Timeout { waited_secs: u64, attempts: usize },

    #[error("Planning error: {0}")]
    Planning(#[from] PlanningError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Common error: {0}")]
    Common(#[from] contractprobe_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Worker panicked: {0}")]
    Worker(String),
}

impl EngineError {
    /// Errors that abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Auth(_)
                | EngineError::Timeout { .. }
                | EngineError::Planning(_)
                | EngineError::Config(_)
                | EngineError::Worker(_)
        )
    }
}

/// Reasons a plan cannot be built
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanningError {
    #[error("case '{case}' depends on unknown case '{dependency}'")]
    UnknownDependency { case: String, dependency: String },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("duplicate case id '{0}'")]
    DuplicateCase(String),
}

/// Normalised transport failure from the HTTP adapter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("invalid response body: {0}")]
    Body(String),

    #[error("request failed: {0}")]
    Other(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

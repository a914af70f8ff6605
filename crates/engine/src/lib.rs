//! ContractProbe Engine
//!
//! Turns an endpoint catalog into a dependency-ordered plan of HTTP
//! operations, runs each entry through its step sequence against a live API
//! and reports structural differences.
//!
//! # Example
//!
//! ```no_run
//! use contractprobe_common::RunConfig;
//! use contractprobe_engine::{Catalog, Engine, RunInputs};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> contractprobe_engine::EngineResult<()> {
//! let engine = Engine::from_config(RunConfig::default())?;
//! let inputs = RunInputs {
//!     catalog: Catalog::load("catalog.json".as_ref())?,
//!     fixtures: vec![],
//! };
//! let report = engine.run("local", &inputs, &CancellationToken::new()).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod catalog;
pub mod coordinator;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executor;
pub mod http;
pub mod planner;
pub mod readiness;
pub mod registry;
pub mod report;

pub use auth::{authenticate, AuthToken, Authenticator, TokenGrant};
pub use catalog::{fixtures_from_yaml, load_fixtures, Blacklist, Catalog};
pub use coordinator::Coordinator;
pub use diff::{diff, DiffEngine};
pub use engine::{Engine, RunInputs};
pub use error::{EngineError, EngineResult, PlanningError, TransportError};
pub use executor::{Executor, ExecutorSettings};
pub use http::{ApiRequest, ApiResponse, HttpTransport, RequestBody, ReqwestTransport};
pub use planner::{EntryKind, Plan, PlanEntry, PlanFilters, Planner};
pub use readiness::{Backoff, CommandStarter, ComputeStarter, Readiness, ReadinessPoller};
pub use registry::{
    EngineLauncher, EventBatch, RegistryError, RunHandle, RunLauncher, RunRequest, RunState,
    RunSummary, TaskRegistry,
};

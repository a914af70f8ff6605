//! Task registry - runs submitted in-process with offset-based event polling
//!
//! The registry keeps a bounded history. When a submission would exceed the
//! capacity, the oldest finished run is evicted; if every retained run is
//! still going, the oldest run is cancelled and evicted instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use contractprobe_common::{EventLog, RunConfig, RunEvent, RunReport, RunStatus};

use crate::engine::{Engine, RunInputs};
use crate::error::{EngineError, EngineResult};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown run: {0}")]
    UnknownRun(RunHandle),
}

/// Opaque identifier of a submitted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunHandle(pub Uuid);

impl RunHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What to run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub config: RunConfig,
    pub inputs: RunInputs,
}

/// Lifecycle of a submitted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RunState {
    Running,
    /// Finished with a report
    Completed(RunStatus),
    /// Aborted by a fatal error; no report
    Errored(String),
}

impl RunState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, RunState::Running)
    }
}

/// Events appended since the polled offset
#[derive(Debug, Clone, Serialize)]
pub struct EventBatch {
    pub events: Vec<RunEvent>,
    /// Offset to pass to the next poll
    pub next_offset: u64,
    pub state: RunState,
}

/// Listing entry
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub handle: RunHandle,
    pub submitted_at: DateTime<Utc>,
    pub state: RunState,
}

/// Executes a run request
#[async_trait]
pub trait RunLauncher: Send + Sync {
    async fn launch(
        &self,
        run_id: String,
        request: RunRequest,
        events: EventLog,
        cancel: CancellationToken,
    ) -> EngineResult<RunReport>;
}

/// Launches runs through [`Engine::from_config`]
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineLauncher;

#[async_trait]
impl RunLauncher for EngineLauncher {
    async fn launch(
        &self,
        run_id: String,
        request: RunRequest,
        events: EventLog,
        cancel: CancellationToken,
    ) -> EngineResult<RunReport> {
        let engine = Engine::from_config(request.config)?.with_events(events);
        engine.run(&run_id, &request.inputs, &cancel).await
    }
}

struct RunRecord {
    handle: RunHandle,
    submitted_at: DateTime<Utc>,
    events: EventLog,
    cancel: CancellationToken,
    state: watch::Receiver<RunState>,
    report: Arc<RwLock<Option<RunReport>>>,
}

/// Process-scoped store of runs
pub struct TaskRegistry {
    capacity: usize,
    launcher: Arc<dyn RunLauncher>,
    runs: RwLock<VecDeque<RunRecord>>,
}

impl TaskRegistry {
    pub fn new(capacity: usize, launcher: Arc<dyn RunLauncher>) -> Self {
        Self {
            capacity: capacity.max(1),
            launcher,
            runs: RwLock::new(VecDeque::new()),
        }
    }

    /// Start a run on the current tokio runtime
    pub fn submit(&self, request: RunRequest) -> RunHandle {
        let handle = RunHandle::new();
        let events = EventLog::new();
        let cancel = CancellationToken::new();
        let report = Arc::new(RwLock::new(None));
        let (tx, rx) = watch::channel(RunState::Running);

        self.make_room();

        let launcher = self.launcher.clone();
        let task_events = events.clone();
        let task_cancel = cancel.clone();
        let task_report = report.clone();
        tokio::spawn(async move {
            let launched = AssertUnwindSafe(launcher.launch(
                handle.to_string(),
                request,
                task_events.clone(),
                task_cancel,
            ))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(EngineError::Worker("run task panicked".to_string())));

            let state = match launched {
                Ok(run_report) => {
                    let state = RunState::Completed(run_report.status);
                    *task_report.write() = Some(run_report);
                    state
                }
                Err(e) => {
                    task_events.critical(format!("Run aborted: {}", e));
                    RunState::Errored(e.to_string())
                }
            };
            info!("Run {} finished: {:?}", handle, state);
            // receivers may all be gone once the run is evicted
            let _ = tx.send(state);
        });

        self.runs.write().push_back(RunRecord {
            handle,
            submitted_at: Utc::now(),
            events,
            cancel,
            state: rx,
            report,
        });
        info!("Submitted run {}", handle);
        handle
    }

    fn make_room(&self) {
        let mut runs = self.runs.write();
        while runs.len() >= self.capacity {
            let victim = runs
                .iter()
                .position(|r| r.state.borrow().is_finished())
                .unwrap_or(0);
            if let Some(record) = runs.remove(victim) {
                if !record.state.borrow().is_finished() {
                    warn!("Evicting unfinished run {}", record.handle);
                    record.cancel.cancel();
                }
            }
        }
    }

    fn with_record<T>(&self, handle: RunHandle, f: impl FnOnce(&RunRecord) -> T) -> Result<T, RegistryError> {
        let runs = self.runs.read();
        runs.iter()
            .find(|r| r.handle == handle)
            .map(f)
            .ok_or(RegistryError::UnknownRun(handle))
    }

    /// Events at or after `since`, the offset to resume from and the current state
    pub fn poll_new_events(&self, handle: RunHandle, since: u64) -> Result<EventBatch, RegistryError> {
        self.with_record(handle, |record| {
            // state first: a finished state then guarantees its final events are in the batch
            let state = record.state.borrow().clone();
            let events = record.events.since(since);
            let next_offset = events.last().map(|e| e.seq + 1).unwrap_or(since);
            EventBatch {
                events,
                next_offset,
                state,
            }
        })
    }

    /// Request cancellation; a no-op for finished runs
    pub fn cancel(&self, handle: RunHandle) -> Result<(), RegistryError> {
        self.with_record(handle, |record| {
            if !record.state.borrow().is_finished() {
                info!("Cancelling run {}", handle);
                record.cancel.cancel();
            }
        })
    }

    pub fn state(&self, handle: RunHandle) -> Result<RunState, RegistryError> {
        self.with_record(handle, |record| record.state.borrow().clone())
    }

    /// The report, once the run completed
    pub fn report(&self, handle: RunHandle) -> Result<Option<RunReport>, RegistryError> {
        self.with_record(handle, |record| record.report.read().clone())
    }

    /// Wait for the run to finish
    pub async fn wait(&self, handle: RunHandle) -> Result<RunState, RegistryError> {
        let mut rx = self.with_record(handle, |record| record.state.clone())?;
        if rx.wait_for(RunState::is_finished).await.is_err() {
            warn!("Run {} ended without reporting a final state", handle);
        }
        let state = rx.borrow().clone();
        Ok(state)
    }

    /// Retained runs, oldest first
    pub fn list(&self) -> Vec<RunSummary> {
        self.runs
            .read()
            .iter()
            .map(|r| RunSummary {
                handle: r.handle,
                submitted_at: r.submitted_at,
                state: r.state.borrow().clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

//! Run orchestration: readiness, planning, authentication and execution

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use contractprobe_common::{EventLog, FixtureCase, RunConfig, RunReport, RunStatus};

use crate::auth::Authenticator;
use crate::catalog::{Blacklist, Catalog};
use crate::coordinator::Coordinator;
use crate::diff::DiffEngine;
use crate::error::{EngineError, EngineResult};
use crate::executor::{Executor, ExecutorSettings};
use crate::http::{join_url, HttpTransport, ReqwestTransport};
use crate::planner::{Plan, PlanFilters, Planner};
use crate::readiness::{CommandStarter, ComputeStarter, Readiness, ReadinessPoller};

/// Everything a run consumes besides configuration
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub catalog: Catalog,
    pub fixtures: Vec<FixtureCase>,
}

/// Drives a complete test run against one API
pub struct Engine {
    config: RunConfig,
    transport: Arc<dyn HttpTransport>,
    starter: Option<Arc<dyn ComputeStarter>>,
    events: EventLog,
}

impl Engine {
    /// Create an engine over `transport`; the configuration is validated here
    pub fn new(config: RunConfig, transport: Arc<dyn HttpTransport>) -> EngineResult<Self> {
        let config = config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let starter = if config.auto_start_vm {
            config
                .readiness
                .start_command
                .as_deref()
                .and_then(CommandStarter::from_argv)
                .map(|s| Arc::new(s) as Arc<dyn ComputeStarter>)
        } else {
            None
        };

        Ok(Self {
            config,
            transport,
            starter,
            events: EventLog::new(),
        })
    }

    /// Create an engine talking HTTP through reqwest
    pub fn from_config(config: RunConfig) -> EngineResult<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.request_timeout_secs))
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Self::new(config, Arc::new(transport))
    }

    pub fn with_starter(mut self, starter: Arc<dyn ComputeStarter>) -> Self {
        self.starter = Some(starter);
        self
    }

    /// Record events into an existing log
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Build the execution plan without touching the network
    pub fn plan(&self, inputs: &RunInputs) -> EngineResult<Plan> {
        let planner = Planner::new(
            Blacklist::with_entries(&self.config.blacklist),
            PlanFilters::from_config(&self.config),
        );
        Ok(planner.build(&inputs.catalog, &inputs.fixtures, self.config.mode)?)
    }

    /// Poll the health endpoint until the API answers
    pub async fn wait_ready(&self) -> EngineResult<Readiness> {
        let mut poller =
            ReadinessPoller::from_config(self.transport.clone(), &self.config.readiness, self.events.clone());
        if let Some(starter) = &self.starter {
            poller = poller.with_starter(starter.clone());
        }
        let health_url = join_url(&self.config.base_url, &self.config.readiness.health_path);
        poller
            .wait_until_ready(&health_url, Duration::from_secs(self.config.max_wait_seconds))
            .await
    }

    /// Execute a full run.
    ///
    /// Readiness timeouts, planning errors and authentication failures abort
    /// the run before any test step is taken and are returned as errors.
    /// Cancelling during the readiness wait returns [`EngineError::Cancelled`].
    pub async fn run(
        &self,
        run_id: &str,
        inputs: &RunInputs,
        cancel: &CancellationToken,
    ) -> EngineResult<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.events.info(format!(
            "Run {} against {} ({} mode)",
            run_id, self.config.base_url, self.config.mode
        ));

        if self.config.readiness.enabled || self.config.auto_start_vm {
            tokio::select! {
                ready = self.wait_ready() => {
                    ready?;
                }
                _ = cancel.cancelled() => {
                    self.events.warn("Cancelled while waiting for the API");
                    return Err(EngineError::Cancelled);
                }
            }
        }

        let plan = match self.plan(inputs) {
            Ok(plan) => plan,
            Err(e) => {
                self.events.error(e.to_string());
                return Err(e);
            }
        };

        let auth = match &self.config.auth {
            Some(config) => {
                let auth = Arc::new(Authenticator::new(
                    self.transport.clone(),
                    &self.config.base_url,
                    config,
                ));
                if let Err(e) = auth.get_valid_token().await {
                    self.events.critical(e.to_string());
                    return Err(e);
                }
                Some(auth)
            }
            None => None,
        };

        let executor = Arc::new(Executor::new(
            self.transport.clone(),
            auth,
            ExecutorSettings::from_config(&self.config),
            DiffEngine::new(&self.config.ignored_diff_paths),
            self.events.clone(),
        ));
        let coordinator = Coordinator::new(executor, self.events.clone(), self.config.workers())
            .with_run_timeout(self.config.run_timeout_secs.map(Duration::from_secs));

        let mut results = coordinator.run(&plan.entries, cancel).await?;
        results.extend(plan.skipped);

        let report = RunReport::new(
            run_id,
            started_at,
            clock.elapsed().as_millis() as u64,
            results,
            cancel.is_cancelled(),
        );
        match report.status {
            RunStatus::Passed => self.events.success(report.summary()),
            RunStatus::Failed => self.events.error(report.summary()),
            RunStatus::Cancelled => self.events.warn(report.summary()),
        }
        Ok(report)
    }
}

//! Concurrency coordinator - dispatches plan entries to a bounded worker pool
//!
//! An entry is dispatched only after every dependency has reached a terminal
//! state. If any dependency did not pass, the entry is skipped without a
//! network call. Results come back in plan order regardless of completion
//! order.

use futures::FutureExt;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use contractprobe_common::{EventLog, Outcome, TestResult};

use crate::error::{EngineError, EngineResult};
use crate::executor::Executor;
use crate::planner::PlanEntry;

type Completion = (usize, EngineResult<TestResult>);

enum Wake {
    Joined(Option<Result<Completion, JoinError>>),
    Cancelled,
    Deadline,
}

/// Runs a plan with at most `max_parallel` entries in flight
pub struct Coordinator {
    executor: Arc<Executor>,
    events: EventLog,
    max_parallel: usize,
    run_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(executor: Arc<Executor>, events: EventLog, max_parallel: usize) -> Self {
        Self {
            executor,
            events,
            max_parallel: max_parallel.max(1),
            run_timeout: None,
        }
    }

    /// Abort the whole pool once `timeout` has elapsed
    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Execute every entry, returning one result per entry in plan order.
    ///
    /// Once `cancel` fires or the run timeout passes, nothing new is
    /// dispatched. In-flight entries are never aborted mid-request; they stop
    /// at their next step boundary and keep the steps taken so far. Entries
    /// that never started are reported cancelled. A fatal executor error
    /// stops dispatch the same way and is returned once the pool drains.
    pub async fn run(&self, entries: &[PlanEntry], cancel: &CancellationToken) -> EngineResult<Vec<TestResult>> {
        let total = entries.len();
        let mut results: Vec<Option<TestResult>> = (0..total).map(|_| None).collect();
        let mut dispatched = vec![false; total];
        let mut in_flight: HashSet<usize> = HashSet::new();
        let mut tasks: JoinSet<Completion> = JoinSet::new();
        let deadline = self.run_timeout.map(|t| Instant::now() + t);
        // trips on user cancellation, the run timeout or a fatal error
        let stop = cancel.child_token();
        let mut fatal: Option<EngineError> = None;
        let mut cancel_noted = false;
        let mut timed_out = false;

        self.events.info(format!(
            "Running {} entr{} with {} worker(s)",
            total,
            plural(total),
            self.max_parallel
        ));

        loop {
            if !stop.is_cancelled() {
                self.dispatch(entries, &mut results, &mut dispatched, &mut in_flight, &mut tasks, &stop);
            }
            if tasks.is_empty() {
                break;
            }

            let wake = tokio::select! {
                joined = tasks.join_next() => Wake::Joined(joined),
                _ = cancel.cancelled(), if !cancel_noted => Wake::Cancelled,
                _ = wait_for(deadline), if !timed_out => Wake::Deadline,
            };

            match wake {
                Wake::Joined(Some(Ok((idx, Ok(result))))) => {
                    in_flight.remove(&idx);
                    let done = results.iter().filter(|r| r.is_some()).count() + 1;
                    debug!("[{}/{}] {} -> {}", done, total, result.id, result.outcome);
                    results[idx] = Some(result);
                }
                Wake::Joined(Some(Ok((idx, Err(e))))) => {
                    in_flight.remove(&idx);
                    if fatal.is_none() {
                        self.events.critical(format!(
                            "{} aborted the run: {}; waiting for {} in-flight entr{}",
                            entries[idx].id,
                            e,
                            in_flight.len(),
                            plural(in_flight.len())
                        ));
                        stop.cancel();
                        fatal = Some(e);
                    } else {
                        warn!("{} failed after the run was aborted: {}", entries[idx].id, e);
                    }
                }
                Wake::Joined(Some(Err(e))) => {
                    // panics are caught inside the task
                    warn!("Worker task ended abnormally: {}", e);
                }
                Wake::Joined(None) => break,
                Wake::Cancelled => {
                    cancel_noted = true;
                    self.events.warn(format!(
                        "Cancellation requested; waiting for {} in-flight entr{}",
                        in_flight.len(),
                        plural(in_flight.len())
                    ));
                }
                Wake::Deadline => {
                    timed_out = true;
                    stop.cancel();
                    self.events.error(format!(
                        "Run timeout of {}s exceeded; waiting for {} in-flight entr{} to reach a step boundary",
                        self.run_timeout.map(|t| t.as_secs()).unwrap_or_default(),
                        in_flight.len(),
                        plural(in_flight.len())
                    ));
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }

        let reason = if timed_out { "run timeout exceeded" } else { "run cancelled" };
        Ok(results
            .into_iter()
            .zip(entries)
            .map(|(result, entry)| result.unwrap_or_else(|| TestResult::cancelled(&entry.id, reason)))
            .collect())
    }

    /// Start every ready entry the pool has room for, skipping those with a
    /// non-passing dependency.
    fn dispatch(
        &self,
        entries: &[PlanEntry],
        results: &mut [Option<TestResult>],
        dispatched: &mut [bool],
        in_flight: &mut HashSet<usize>,
        tasks: &mut JoinSet<Completion>,
        cancel: &CancellationToken,
    ) {
        // entries are in topological order, so one pass propagates skips
        for idx in 0..entries.len() {
            if dispatched[idx] {
                continue;
            }
            let entry = &entries[idx];
            if entry.depends_on.iter().any(|&dep| results[dep].is_none()) {
                continue;
            }

            let blocker = entry.depends_on.iter().find_map(|&dep| {
                results[dep]
                    .as_ref()
                    .filter(|r| r.outcome != Outcome::Passed)
                    .map(|r| (dep, r.outcome))
            });
            if let Some((dep, outcome)) = blocker {
                dispatched[idx] = true;
                let reason = format!("dependency {} {}", entries[dep].id, outcome);
                self.events.warn(format!("{} skipped: {}", entry.id, reason));
                results[idx] = Some(TestResult::skipped(&entry.id, reason));
                continue;
            }

            if in_flight.len() >= self.max_parallel {
                continue;
            }

            dispatched[idx] = true;
            in_flight.insert(idx);
            let executor = self.executor.clone();
            let entry = entry.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(executor.execute(&entry, &token))
                    .catch_unwind()
                    .await;
                let result = outcome.unwrap_or_else(|_| {
                    let mut result = TestResult::new(&entry.id);
                    result.outcome = Outcome::Failed;
                    result.reason = Some("worker panicked".to_string());
                    Ok(result)
                });
                (idx, result)
            });
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

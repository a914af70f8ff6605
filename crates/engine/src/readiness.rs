//! Environment readiness - polling the API health endpoint until it answers

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use contractprobe_common::{EventLog, ReadinessConfig};

use crate::error::{EngineError, EngineResult};
use crate::http::{ApiRequest, HttpTransport};

/// Starts the compute resource hosting the API
#[async_trait]
pub trait ComputeStarter: Send + Sync {
    /// Fire the start action; must not wait for the resource to come up
    async fn start(&self) -> Result<(), String>;
}

/// Starts the VM by spawning an external command (e.g. a cloud CLI)
#[derive(Debug, Clone)]
pub struct CommandStarter {
    program: String,
    args: Vec<String>,
}

impl CommandStarter {
    /// Build from `[program, args...]`
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ComputeStarter for CommandStarter {
    async fn start(&self) -> Result<(), String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.program, e))?;

        // Reap in the background; the outcome is not awaited
        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
                Err(e) => warn!("{} could not be awaited: {}", program, e),
                _ => {}
            }
        });
        Ok(())
    }
}

/// Capped exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(15))
    }
}

/// What a successful wait observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: usize,
    pub elapsed: Duration,
    pub start_requested: bool,
}

/// Polls a health URL until it returns 2xx or the budget runs out
pub struct ReadinessPoller {
    transport: Arc<dyn HttpTransport>,
    starter: Option<Arc<dyn ComputeStarter>>,
    backoff: Backoff,
    events: EventLog,
}

impl ReadinessPoller {
    pub fn new(transport: Arc<dyn HttpTransport>, events: EventLog) -> Self {
        Self {
            transport,
            starter: None,
            backoff: Backoff::default(),
            events,
        }
    }

    pub fn from_config(
        transport: Arc<dyn HttpTransport>,
        config: &ReadinessConfig,
        events: EventLog,
    ) -> Self {
        Self::new(transport, events).with_backoff(Backoff::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        ))
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Trigger this action once per wait when the first poll fails
    pub fn with_starter(mut self, starter: Arc<dyn ComputeStarter>) -> Self {
        self.starter = Some(starter);
        self
    }

    /// Wait for `health_url` to answer 2xx within `max_wait`
    pub async fn wait_until_ready(&self, health_url: &str, max_wait: Duration) -> EngineResult<Readiness> {
        let start = Instant::now();
        let mut attempts = 0usize;
        let mut start_requested = false;

        self.events.info(format!(
            "Waiting up to {}s for {}",
            max_wait.as_secs(),
            health_url
        ));

        loop {
            attempts += 1;

            // a poll never outlives the remaining budget
            let remaining = max_wait.saturating_sub(start.elapsed());
            let poll = timeout(remaining, self.transport.send(ApiRequest::get(health_url))).await;
            let failure = match poll {
                Ok(Ok(resp)) if resp.is_success() => {
                    let elapsed = start.elapsed();
                    self.events.success(format!(
                        "API ready after {} attempt(s) ({:.1}s)",
                        attempts,
                        elapsed.as_secs_f64()
                    ));
                    return Ok(Readiness {
                        attempts,
                        elapsed,
                        start_requested,
                    });
                }
                Ok(Ok(resp)) => format!("health check returned {}", resp.status),
                Ok(Err(e)) => format!("health check failed: {}", e),
                Err(_) => format!("health check still pending after {}s", max_wait.as_secs()),
            };
            self.events.warn(format!("Poll {}: {}", attempts, failure));

            if !start_requested {
                if let Some(starter) = &self.starter {
                    start_requested = true;
                    self.events.info("Requesting VM start");
                    if let Err(e) = starter.start().await {
                        self.events.error(format!("VM start request failed: {}", e));
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= max_wait {
                self.events.error(format!(
                    "API not ready after {}s ({} attempts)",
                    elapsed.as_secs(),
                    attempts
                ));
                return Err(EngineError::Timeout {
                    waited_secs: elapsed.as_secs(),
                    attempts,
                });
            }

            let delay = self
                .backoff
                .delay(attempts as u32 - 1)
                .min(max_wait - elapsed);
            debug!("Next health poll in {:?}", delay);
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::http::ApiResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` polls with a connection error
    struct FlakyHealth {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HttpTransport for FlakyHealth {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TransportError::Connect("connection refused".into()))
            } else {
                Ok(ApiResponse::new(200, None))
            }
        }
    }

    /// Accepts the connection but answers far too late
    struct HangingHealth;

    #[async_trait]
    impl HttpTransport for HangingHealth {
        async fn send(&self, _request: ApiRequest) -> Result<ApiResponse, TransportError> {
            sleep(Duration::from_secs(1000)).await;
            Ok(ApiResponse::new(200, None))
        }
    }

    #[derive(Default)]
    struct CountingStarter {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl ComputeStarter for CountingStarter {
        async fn start(&self) -> Result<(), String> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (0..6).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 15, 15, 15]);
        assert_eq!(backoff.delay(40), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_three_failures() {
        let transport = Arc::new(FlakyHealth {
            failures: 3,
            calls: AtomicUsize::new(0),
        });
        let events = EventLog::new();
        let poller = ReadinessPoller::new(transport.clone(), events.clone());

        let ready = poller
            .wait_until_ready("http://vm/health", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(ready.attempts, 4);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        // 2 + 4 + 8 seconds of backoff
        assert!(ready.elapsed >= Duration::from_secs(14));
        assert!(ready.elapsed < Duration::from_secs(15));
        assert!(events.len() >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_never_ready() {
        let transport = Arc::new(FlakyHealth {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let poller = ReadinessPoller::new(transport.clone(), EventLog::new());

        let err = poller
            .wait_until_ready("http://vm/health", Duration::from_secs(20))
            .await
            .unwrap_err();

        // polls at 0, 2, 6, 14, 20
        assert!(matches!(err, EngineError::Timeout { attempts: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_poll_does_not_outlive_budget() {
        let poller = ReadinessPoller::new(Arc::new(HangingHealth), EventLog::new());
        let started = Instant::now();

        let err = poller
            .wait_until_ready("http://vm/health", Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Timeout { attempts: 1, .. }));
        assert!(started.elapsed() <= Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vm_start_requested_once() {
        let transport = Arc::new(FlakyHealth {
            failures: 4,
            calls: AtomicUsize::new(0),
        });
        let starter = Arc::new(CountingStarter::default());
        let poller = ReadinessPoller::new(transport, EventLog::new()).with_starter(starter.clone());

        let ready = poller
            .wait_until_ready("http://vm/health", Duration::from_secs(120))
            .await
            .unwrap();

        assert!(ready.start_requested);
        assert_eq!(starter.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_start_when_first_poll_succeeds() {
        let transport = Arc::new(FlakyHealth {
            failures: 0,
            calls: AtomicUsize::new(0),
        });
        let starter = Arc::new(CountingStarter::default());
        let poller = ReadinessPoller::new(transport, EventLog::new()).with_starter(starter.clone());

        let ready = poller
            .wait_until_ready("http://vm/health", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(ready.attempts, 1);
        assert_eq!(starter.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_command_starter_from_argv() {
        assert!(CommandStarter::from_argv(&[]).is_none());
        let starter = CommandStarter::from_argv(&["az".into(), "vm".into(), "start".into()]).unwrap();
        assert_eq!(starter.program, "az");
        assert_eq!(starter.args, vec!["vm".to_string(), "start".to_string()]);
    }
}

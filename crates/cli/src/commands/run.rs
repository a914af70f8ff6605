//! `contractprobe run`

use anyhow::Result;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use contractprobe_common::{AuthConfig, Outcome, RunConfig, RunMode, RunReport, RunStatus};
use contractprobe_engine::{report, EngineLauncher, RunRequest, RunState, TaskRegistry};

use super::{load_inputs, EXIT_FAILED, EXIT_FATAL, EXIT_PASSED};
use crate::output::{
    print_document, print_error, print_event, print_info, print_list, print_success, print_warning,
    OutputFormat,
};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// GET, DELETE, POST, VERIFY, COMPARE per resource
    Full,
    /// One GET per endpoint
    Readonly,
    /// POST fixture cases
    Fixture,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => RunMode::Full,
            ModeArg::Readonly => RunMode::Readonly,
            ModeArg::Fixture => RunMode::Fixture,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Endpoint catalog (JSON)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Fixture case file or directory (YAML)
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    /// Test mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Run independent entries concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Worker pool size with --parallel
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Start the VM if the API does not answer
    #[arg(long)]
    pub auto_start_vm: bool,

    /// Readiness budget in seconds
    #[arg(long)]
    pub max_wait_seconds: Option<u64>,

    #[arg(long)]
    pub skip_cleanup: bool,

    #[arg(long)]
    pub skip_verify: bool,

    /// Discover live ids for unbound path parameters
    #[arg(long)]
    pub use_real_data: bool,

    /// Only run fixture cases tagged with this module
    #[arg(long)]
    pub module: Option<String>,

    /// Path prefix excluded from comparison (repeatable)
    #[arg(long = "ignore")]
    pub ignored_diff_paths: Vec<String>,

    /// Global run budget in seconds
    #[arg(long)]
    pub run_timeout: Option<u64>,

    #[arg(long, env = "CONTRACTPROBE_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "CONTRACTPROBE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Token endpoint, absolute or relative to the base URL
    #[arg(long)]
    pub token_url: Option<String>,

    /// Write the report as JSON
    #[arg(long)]
    pub json_report: Option<PathBuf>,

    /// Write the report as JUnit XML
    #[arg(long)]
    pub junit_report: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay command-line flags on the file configuration
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if self.parallel {
            config.parallel = true;
        }
        if let Some(n) = self.max_parallel {
            config.max_parallel = n;
        }
        if self.auto_start_vm {
            config.auto_start_vm = true;
        }
        if let Some(secs) = self.max_wait_seconds {
            config.max_wait_seconds = secs;
        }
        config.skip_cleanup |= self.skip_cleanup;
        config.skip_verify |= self.skip_verify;
        config.use_real_data |= self.use_real_data;
        if self.module.is_some() {
            config.module = self.module.clone();
        }
        config
            .ignored_diff_paths
            .extend(self.ignored_diff_paths.iter().cloned());
        if self.run_timeout.is_some() {
            config.run_timeout_secs = self.run_timeout;
        }

        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            let existing = config.auth.take();
            config.auth = Some(AuthConfig {
                token_url: self
                    .token_url
                    .clone()
                    .or_else(|| existing.as_ref().map(|a| a.token_url.clone()))
                    .unwrap_or_else(|| "/oauth/token".to_string()),
                username: username.clone(),
                password: password.clone(),
                client_id: existing.as_ref().and_then(|a| a.client_id.clone()),
                refresh_margin_secs: existing.map(|a| a.refresh_margin_secs).unwrap_or(30),
            });
        } else if let (Some(token_url), Some(auth)) = (&self.token_url, config.auth.as_mut()) {
            auth.token_url = token_url.clone();
        }
    }
}

pub async fn execute(args: RunArgs, mut config: RunConfig, format: OutputFormat) -> Result<i32> {
    args.apply(&mut config);
    let inputs = load_inputs(args.catalog.as_ref(), args.fixtures.as_ref(), config.mode)?;
    let live = matches!(format, OutputFormat::Table | OutputFormat::Plain);

    let registry = TaskRegistry::new(1, Arc::new(EngineLauncher));
    let handle = registry.submit(RunRequest { config, inputs });

    let mut offset = 0;
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut cancel_requested = false;
    let state = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                print_warning("Cancelling; waiting for in-flight steps to finish");
                registry.cancel(handle)?;
                cancel_requested = true;
            }
            _ = ticker.tick() => {}
        }

        let batch = registry.poll_new_events(handle, offset)?;
        if live {
            batch.events.iter().for_each(print_event);
        }
        offset = batch.next_offset;
        if batch.state.is_finished() {
            break batch.state;
        }
    };

    match state {
        RunState::Errored(message) if cancel_requested => {
            print_warning(&message);
            Ok(EXIT_FAILED)
        }
        RunState::Errored(message) => {
            print_error(&message);
            Ok(EXIT_FATAL)
        }
        RunState::Running => Ok(EXIT_FATAL),
        RunState::Completed(_) => match registry.report(handle)? {
            Some(run_report) => finish(&run_report, &args, format),
            None => {
                print_error("run finished without a report");
                Ok(EXIT_FATAL)
            }
        },
    }
}

fn finish(run_report: &RunReport, args: &RunArgs, format: OutputFormat) -> Result<i32> {
    match format {
        OutputFormat::Json | OutputFormat::Yaml => print_document(run_report, format),
        OutputFormat::Table | OutputFormat::Plain => {
            print_list(&run_report.results, format);
            for result in &run_report.results {
                if result.outcome == Outcome::Failed && !result.differences.is_empty() {
                    println!();
                    print_info(&format!("Differences for {}", result.id));
                    print_list(&result.differences, format);
                }
            }
        }
    }

    if let Some(path) = &args.json_report {
        report::write_json(run_report, path)?;
    }
    if let Some(path) = &args.junit_report {
        report::write_junit(run_report, path)?;
    }

    let summary = run_report.summary();
    Ok(match run_report.status {
        RunStatus::Passed => {
            print_success(&summary);
            EXIT_PASSED
        }
        RunStatus::Failed => {
            print_error(&summary);
            EXIT_FAILED
        }
        RunStatus::Cancelled => {
            print_warning(&summary);
            EXIT_FAILED
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = RunArgs {
            mode: Some(ModeArg::Fixture),
            parallel: true,
            max_parallel: Some(4),
            skip_cleanup: true,
            ignored_diff_paths: vec!["updatedAt".to_string()],
            username: Some("probe".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let mut config = RunConfig::default();
        args.apply(&mut config);

        assert_eq!(config.mode, RunMode::Fixture);
        assert_eq!(config.workers(), 4);
        assert!(config.skip_cleanup);
        assert!(config.ignored_diff_paths.contains("updatedAt"));
        let auth = config.auth.unwrap();
        assert_eq!(auth.token_url, "/oauth/token");
        assert_eq!(auth.username, "probe");
    }

    #[test]
    fn test_token_url_kept_from_file() {
        let mut config = RunConfig {
            auth: Some(AuthConfig {
                token_url: "/auth/token".to_string(),
                username: "file".to_string(),
                password: "pw".to_string(),
                client_id: Some("cli".to_string()),
                refresh_margin_secs: 60,
            }),
            ..Default::default()
        };
        let args = RunArgs {
            username: Some("flag".to_string()),
            password: Some("pw2".to_string()),
            ..Default::default()
        };
        args.apply(&mut config);

        let auth = config.auth.unwrap();
        assert_eq!(auth.token_url, "/auth/token");
        assert_eq!(auth.username, "flag");
        assert_eq!(auth.client_id.as_deref(), Some("cli"));
        assert_eq!(auth.refresh_margin_secs, 60);
    }

    #[test]
    fn test_absent_flags_leave_config_alone() {
        let mut config = RunConfig {
            max_wait_seconds: 42,
            ..Default::default()
        };
        let before = config.clone();
        RunArgs::default().apply(&mut config);
        assert_eq!(config, before);
    }
}

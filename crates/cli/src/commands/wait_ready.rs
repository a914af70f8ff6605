//! `contractprobe wait-ready` - block until the API health endpoint answers

use anyhow::Result;
use clap::Args;

use contractprobe_common::RunConfig;
use contractprobe_engine::Engine;

use super::{EXIT_FATAL, EXIT_PASSED};
use crate::output::{print_error, print_event, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct WaitReadyArgs {
    /// Readiness budget in seconds
    #[arg(long)]
    pub max_wait_seconds: Option<u64>,

    /// Start the VM if the first poll fails
    #[arg(long)]
    pub auto_start_vm: bool,
}

pub async fn execute(args: WaitReadyArgs, mut config: RunConfig, format: OutputFormat) -> Result<i32> {
    if let Some(secs) = args.max_wait_seconds {
        config.max_wait_seconds = secs;
    }
    config.auto_start_vm |= args.auto_start_vm;

    let engine = Engine::from_config(config)?;
    let outcome = engine.wait_ready().await;

    if matches!(format, OutputFormat::Table | OutputFormat::Plain) {
        engine.events().since(0).iter().for_each(print_event);
    }

    match outcome {
        Ok(ready) => {
            print_success(&format!(
                "API ready after {} attempt(s) in {:.1}s",
                ready.attempts,
                ready.elapsed.as_secs_f64()
            ));
            Ok(EXIT_PASSED)
        }
        Err(e) => {
            print_error(&e.to_string());
            Ok(EXIT_FATAL)
        }
    }
}

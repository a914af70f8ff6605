//! `contractprobe plan` - show the execution plan without running it

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use contractprobe_common::RunConfig;
use contractprobe_engine::Engine;

use super::{load_inputs, EXIT_PASSED};
use super::run::ModeArg;
use crate::output::{print_info, print_list, OutputFormat, PlanRow};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Endpoint catalog (JSON)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Fixture case file or directory (YAML)
    #[arg(long)]
    pub fixtures: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Only plan fixture cases tagged with this module
    #[arg(long)]
    pub module: Option<String>,
}

pub async fn execute(args: PlanArgs, mut config: RunConfig, format: OutputFormat) -> Result<i32> {
    if let Some(mode) = args.mode {
        config.mode = mode.into();
    }
    if args.module.is_some() {
        config.module = args.module.clone();
    }
    let inputs = load_inputs(args.catalog.as_ref(), args.fixtures.as_ref(), config.mode)?;

    let engine = Engine::from_config(config)?;
    let plan = engine.plan(&inputs)?;

    print_list(&PlanRow::from_entries(&plan.entries), format);
    if !plan.skipped.is_empty() {
        println!();
        print_info(&format!("{} entr{} skipped at planning", plan.skipped.len(), if plan.skipped.len() == 1 { "y" } else { "ies" }));
        print_list(&plan.skipped, format);
    }
    Ok(EXIT_PASSED)
}

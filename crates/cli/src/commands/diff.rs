//! `contractprobe diff` - structural diff of two JSON documents

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};

use contractprobe_engine::DiffEngine;

use super::{EXIT_FAILED, EXIT_PASSED};
use crate::output::{print_list, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Expected document
    pub expected: PathBuf,

    /// Actual document
    pub actual: PathBuf,

    /// Path prefix to ignore (repeatable)
    #[arg(long = "ignore")]
    pub ignored: Vec<String>,
}

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", path.display()))
}

pub async fn execute(args: DiffArgs, format: OutputFormat) -> Result<i32> {
    let expected = read_json(&args.expected)?;
    let actual = read_json(&args.actual)?;

    let differences = DiffEngine::new(&args.ignored).diff(&expected, &actual);
    if differences.is_empty() {
        if matches!(format, OutputFormat::Json | OutputFormat::Yaml) {
            print_list(&differences, format);
        } else {
            print_success("Documents match");
        }
        return Ok(EXIT_PASSED);
    }

    print_list(&differences, format);
    Ok(EXIT_FAILED)
}

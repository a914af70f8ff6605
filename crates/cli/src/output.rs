//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use contractprobe_common::{Difference, Outcome, RunEvent, Severity, TestResult};
use contractprobe_engine::PlanEntry;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("Nothing to show.");
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print any serialisable value in a machine-readable format
pub fn print_document<T: Serialize>(value: &T, format: OutputFormat) {
    match format {
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value).unwrap_or_default()),
        _ => println!("{}", serde_json::to_string_pretty(value).unwrap_or_default()),
    }
}

pub fn outcome_label(outcome: Outcome) -> String {
    match outcome {
        Outcome::Passed => "✓ passed".green().to_string(),
        Outcome::Failed => "✗ failed".red().to_string(),
        Outcome::Skipped => "- skipped".yellow().to_string(),
        Outcome::Cancelled => "⊘ cancelled".dimmed().to_string(),
    }
}

impl TableDisplay for TestResult {
    fn headers() -> Vec<&'static str> {
        vec!["Entry", "Outcome", "Steps", "Failed At", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        let mut detail = self.reason.clone().unwrap_or_default();
        for warning in &self.warnings {
            if !detail.is_empty() {
                detail.push('\n');
            }
            detail.push_str(warning);
        }
        vec![
            self.id.clone(),
            outcome_label(self.outcome),
            self.steps
                .iter()
                .map(|s| s.kind.to_string())
                .collect::<Vec<_>>()
                .join(" → "),
            self.failed_step.map(|s| s.to_string()).unwrap_or_default(),
            format!("{} ms", self.duration_ms),
            detail,
        ]
    }
}

impl TableDisplay for Difference {
    fn headers() -> Vec<&'static str> {
        vec!["Path", "Type", "Expected", "Actual"]
    }

    fn row(&self) -> Vec<String> {
        let show = |v: &Option<serde_json::Value>| v.as_ref().map(|v| v.to_string()).unwrap_or_default();
        vec![
            if self.path.is_empty() { "(root)".to_string() } else { self.path.clone() },
            serde_json::to_value(self.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            show(&self.expected),
            show(&self.actual),
        ]
    }
}

/// Plan entry as listed by `contractprobe plan`
#[derive(Debug, Serialize)]
pub struct PlanRow {
    pub order: usize,
    pub id: String,
    pub kind: String,
    pub target: String,
    pub depends_on: Vec<String>,
}

impl PlanRow {
    pub fn from_entries(entries: &[PlanEntry]) -> Vec<Self> {
        use contractprobe_engine::EntryKind;

        entries
            .iter()
            .enumerate()
            .map(|(order, entry)| {
                let (kind, target) = match &entry.kind {
                    EntryKind::Full { triad, .. } => ("full", triad.get.path.clone()),
                    EntryKind::Readonly { endpoint } => ("readonly", endpoint.key()),
                    EntryKind::Fixture { case } => ("fixture", format!("{} {}", case.method, case.endpoint)),
                };
                PlanRow {
                    order: order + 1,
                    id: entry.id.clone(),
                    kind: kind.to_string(),
                    target,
                    depends_on: entry.depends_on.iter().map(|&i| entries[i].id.clone()).collect(),
                }
            })
            .collect()
    }
}

impl TableDisplay for PlanRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Entry", "Kind", "Target", "Depends On"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.order.to_string(),
            self.id.clone(),
            self.kind.clone(),
            self.target.clone(),
            self.depends_on.join(", "),
        ]
    }
}

/// Print one run event line, coloured by severity
pub fn print_event(event: &RunEvent) {
    let line = event.render();
    match event.severity {
        Severity::Debug => println!("{}", line.dimmed()),
        Severity::Info => println!("{}", line),
        Severity::Success => println!("{}", line.green()),
        Severity::Warn => println!("{}", line.yellow()),
        Severity::Error => eprintln!("{}", line.red()),
        Severity::Critical => eprintln!("{}", line.red().bold()),
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

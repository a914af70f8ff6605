//! JUnit XML rendering
//!
//! One `<testsuite>` per run, one `<testcase>` per result. Failed entries
//! carry the failing step and any differences in the failure body.

use contractprobe_common::{Outcome, RunReport, TestResult};

const SUITE_NAME: &str = "contractprobe";

pub fn render(report: &RunReport) -> String {
    let totals = report.totals;
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(&format!(
        "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{}\">\n",
        totals.total,
        totals.failed,
        totals.skipped + totals.cancelled,
        seconds(report.duration_ms)
    ));
    out.push_str(&format!(
        "  <testsuite name=\"{}\" id=\"{}\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\" time=\"{}\" timestamp=\"{}\">\n",
        SUITE_NAME,
        xml_escape(&report.run_id),
        totals.total,
        totals.failed,
        totals.skipped + totals.cancelled,
        seconds(report.duration_ms),
        report.started_at.format("%Y-%m-%dT%H:%M:%S")
    ));
    for result in &report.results {
        render_case(&mut out, result);
    }
    out.push_str("  </testsuite>\n</testsuites>\n");
    out
}

fn render_case(out: &mut String, result: &TestResult) {
    let open = format!(
        "    <testcase classname=\"{}\" name=\"{}\" time=\"{}\"",
        SUITE_NAME,
        xml_escape(&result.id),
        seconds(result.duration_ms)
    );

    match result.outcome {
        Outcome::Passed if result.warnings.is_empty() => {
            out.push_str(&open);
            out.push_str("/>\n");
        }
        Outcome::Passed => {
            out.push_str(&open);
            out.push_str(">\n");
            out.push_str(&format!(
                "      <system-out>{}</system-out>\n",
                xml_escape(&result.warnings.join("\n"))
            ));
            out.push_str("    </testcase>\n");
        }
        Outcome::Skipped | Outcome::Cancelled => {
            let message = result.reason.as_deref().unwrap_or(match result.outcome {
                Outcome::Cancelled => "cancelled",
                _ => "skipped",
            });
            out.push_str(&open);
            out.push_str(&format!(">\n      <skipped message=\"{}\"/>\n    </testcase>\n", xml_escape(message)));
        }
        Outcome::Failed => {
            let message = result.reason.as_deref().unwrap_or("failed");
            let step = result
                .failed_step
                .map(|s| s.to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            let mut detail = format!("failed at {}: {}", step, message);
            for diff in &result.differences {
                detail.push('\n');
                detail.push_str(&diff.to_string());
            }
            out.push_str(&open);
            out.push_str(&format!(
                ">\n      <failure message=\"{}\" type=\"{}\">{}</failure>\n    </testcase>\n",
                xml_escape(message),
                step,
                xml_escape(&detail)
            ));
        }
    }
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

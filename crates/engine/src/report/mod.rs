//! Run report output

pub mod junit;

use std::path::Path;
use tracing::info;

use contractprobe_common::RunReport;

use crate::error::EngineResult;

/// Write the report as pretty JSON
pub fn write_json(report: &RunReport, path: &Path) -> EngineResult<()> {
    let json = serde_json::to_string_pretty(report)?;
    write_file(path, &json)?;
    info!("Wrote JSON report to {}", path.display());
    Ok(())
}

/// Write the report as a JUnit XML document
pub fn write_junit(report: &RunReport, path: &Path) -> EngineResult<()> {
    write_file(path, &junit::render(report))?;
    info!("Wrote JUnit report to {}", path.display());
    Ok(())
}

fn write_file(path: &Path, content: &str) -> EngineResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contractprobe_common::TestResult;
    use tempfile::tempdir;

    #[test]
    fn test_write_reports() {
        let dir = tempdir().unwrap();
        let report = RunReport::new(
            "run-1",
            Utc::now(),
            12,
            vec![TestResult::new("widgets"), TestResult::skipped("gadgets", "no triad")],
            false,
        );

        let json_path = dir.path().join("out").join("report.json");
        write_json(&report, &json_path).unwrap();
        let parsed: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, report);

        let xml_path = dir.path().join("junit.xml");
        write_junit(&report, &xml_path).unwrap();
        let xml = std::fs::read_to_string(&xml_path).unwrap();
        assert!(xml.contains("tests=\"2\""));
    }
}

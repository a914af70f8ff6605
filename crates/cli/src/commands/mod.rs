//! CLI Commands

pub mod diff;
pub mod plan;
pub mod run;
pub mod wait_ready;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use contractprobe_common::{FixtureCase, RunConfig, RunMode};
use contractprobe_engine::{load_fixtures, Catalog, RunInputs};

/// Every entry passed
pub const EXIT_PASSED: i32 = 0;
/// An entry failed or the run was cancelled
pub const EXIT_FAILED: i32 = 1;
/// Auth, readiness, planning or configuration error
pub const EXIT_FATAL: i32 = 2;

/// Load the config file (defaults if absent) and apply the global base URL override
pub fn load_config(path: &Path, base_url: Option<&str>) -> Result<RunConfig> {
    let mut config = RunConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    if let Some(base_url) = base_url {
        config.base_url = base_url.to_string();
    }
    Ok(config)
}

/// Read the catalog and, in fixture mode, the fixture cases
pub fn load_inputs(catalog: Option<&PathBuf>, fixtures: Option<&PathBuf>, mode: RunMode) -> Result<RunInputs> {
    let catalog = match catalog {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("failed to load catalog from {}", path.display()))?,
        None if mode == RunMode::Fixture => Catalog::default(),
        None => anyhow::bail!("--catalog is required in {} mode", mode),
    };

    let fixtures: Vec<FixtureCase> = match fixtures {
        Some(path) => load_fixtures(path)
            .with_context(|| format!("failed to load fixtures from {}", path.display()))?,
        None if mode == RunMode::Fixture => anyhow::bail!("--fixtures is required in fixture mode"),
        None => Vec::new(),
    };

    Ok(RunInputs { catalog, fixtures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_override() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contractprobe.toml");
        std::fs::write(&path, "base_url = \"http://file:1\"\nmax_parallel = 3\nparallel = true\n").unwrap();

        let config = load_config(&path, None).unwrap();
        assert_eq!(config.base_url, "http://file:1");
        assert_eq!(config.max_parallel, 3);

        let config = load_config(&path, Some("http://flag:2")).unwrap();
        assert_eq!(config.base_url, "http://flag:2");
    }

    #[test]
    fn test_inputs_required_per_mode() {
        assert!(load_inputs(None, None, RunMode::Full).is_err());
        assert!(load_inputs(None, None, RunMode::Fixture).is_err());

        let dir = tempdir().unwrap();
        let fixtures = dir.path().join("cases.yaml");
        std::fs::write(&fixtures, "id: a\nendpoint: /a\n").unwrap();
        let inputs = load_inputs(None, Some(&fixtures), RunMode::Fixture).unwrap();
        assert!(inputs.catalog.is_empty());
        assert_eq!(inputs.fixtures.len(), 1);
    }
}

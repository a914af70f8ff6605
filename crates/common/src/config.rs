//! Run configuration

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::HttpMethod;

/// Which kind of plan to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// GET, DELETE, POST, VERIFY, COMPARE per resource group
    Full,
    /// Single GET per endpoint
    Readonly,
    /// POST fixture cases
    Fixture,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Full
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Readonly => write!(f, "readonly"),
            RunMode::Fixture => write!(f, "fixture"),
        }
    }
}

/// Run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Base URL every endpoint path is resolved against
    pub base_url: String,

    pub mode: RunMode,

    /// Run independent entries concurrently
    pub parallel: bool,

    /// Worker pool size when `parallel` is set
    pub max_parallel: usize,

    /// Start the VM when the first health poll fails
    pub auto_start_vm: bool,

    /// Readiness budget in seconds
    pub max_wait_seconds: u64,

    pub skip_cleanup: bool,

    pub skip_verify: bool,

    /// Discover live ids for unbound path parameters
    pub use_real_data: bool,

    /// Only run fixture cases carrying this module tag
    pub module: Option<String>,

    /// Path prefixes excluded from the COMPARE diff
    pub ignored_diff_paths: BTreeSet<String>,

    /// Only probe these resources (full/readonly); empty means all
    pub resources: Vec<String>,

    /// Global path-parameter bindings, e.g. `id = "1"`
    pub path_params: HashMap<String, String>,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// Global run budget; unterminated entries are cancelled when it elapses
    pub run_timeout_secs: Option<u64>,

    pub auth: Option<AuthConfig>,

    pub readiness: ReadinessConfig,

    pub server_fields: ServerFieldConfig,

    /// Extra path+method pairs never exercised, on top of the built-in list
    pub blacklist: Vec<BlacklistEntry>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            mode: RunMode::Full,
            parallel: false,
            max_parallel: 1,
            auto_start_vm: false,
            max_wait_seconds: 300,
            skip_cleanup: false,
            skip_verify: false,
            use_real_data: false,
            module: None,
            ignored_diff_paths: BTreeSet::new(),
            resources: Vec::new(),
            path_params: HashMap::new(),
            request_timeout_secs: 30,
            run_timeout_secs: None,
            auth: None,
            readiness: ReadinessConfig::default(),
            server_fields: ServerFieldConfig::default(),
            blacklist: Vec::new(),
        }
    }
}

/// OAuth2 password-grant credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token endpoint; relative paths are resolved against `base_url`
    pub token_url: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub client_id: Option<String>,
    /// Refresh when less than this many seconds remain
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

fn default_refresh_margin() -> u64 {
    30
}

/// Health polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Poll the health endpoint before planning
    pub enabled: bool,
    pub health_path: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Command that starts the VM hosting the API, e.g. `["az", "vm", "start", ...]`
    pub start_command: Option<Vec<String>>,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            health_path: "/health".to_string(),
            base_delay_ms: 2_000,
            max_delay_ms: 15_000,
            start_command: None,
        }
    }
}

/// Fields stripped from a GET body before it is POSTed back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFieldConfig {
    pub default: Vec<String>,
    pub per_resource: HashMap<String, Vec<String>>,
}

impl Default for ServerFieldConfig {
    fn default() -> Self {
        Self {
            default: vec!["id".to_string()],
            per_resource: HashMap::new(),
        }
    }
}

impl ServerFieldConfig {
    /// Exclusion list for one resource; a per-resource entry replaces the default
    pub fn for_resource(&self, resource: &str) -> &[String] {
        self.per_resource
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or(&self.default)
    }
}

/// A path+method pair excluded from every run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    /// `None` matches every method
    #[serde(default)]
    pub method: Option<HttpMethod>,
    pub path: String,
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check invariants and normalise the worker count
    pub fn validate(mut self) -> Result<Self> {
        if self.base_url.trim().is_empty() {
            return Err(Error::InvalidConfig("base_url must not be empty".to_string()));
        }
        if self.max_parallel == 0 {
            return Err(Error::InvalidConfig("max_parallel must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.readiness.base_delay_ms == 0 || self.readiness.max_delay_ms < self.readiness.base_delay_ms {
            return Err(Error::InvalidConfig(
                "readiness delays must satisfy 0 < base_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        if let Some(cmd) = &self.readiness.start_command {
            if cmd.is_empty() {
                return Err(Error::InvalidConfig("start_command must not be empty".to_string()));
            }
        }
        if !self.parallel {
            self.max_parallel = 1;
        }
        Ok(self)
    }

    /// Effective worker pool size
    pub fn workers(&self) -> usize {
        if self.parallel {
            self.max_parallel.max(1)
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = RunConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.workers(), 1);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("probe.toml");
        std::fs::write(
            &path,
            r#"
base_url = "https://api.example.test"
mode = "readonly"
parallel = true
max_parallel = 4
ignored_diff_paths = ["updatedAt"]

[auth]
token_url = "/oauth/token"
username = "probe"
password = "secret"

[server_fields.per_resource]
widgets = ["id", "createdAt"]
"#,
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap().validate().unwrap();
        assert_eq!(config.mode, RunMode::Readonly);
        assert_eq!(config.workers(), 4);
        assert!(config.ignored_diff_paths.contains("updatedAt"));
        assert_eq!(config.auth.as_ref().unwrap().refresh_margin_secs, 30);
        assert_eq!(
            config.server_fields.for_resource("widgets"),
            &["id".to_string(), "createdAt".to_string()]
        );
        assert_eq!(config.server_fields.for_resource("gadgets"), &["id".to_string()]);
        assert_eq!(config.readiness.base_delay_ms, 2_000);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("probe.toml");
        let config = RunConfig {
            module: Some("billing".to_string()),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = RunConfig {
            parallel: true,
            max_parallel: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_sequential_normalises_workers() {
        let config = RunConfig {
            parallel: false,
            max_parallel: 8,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(config.max_parallel, 1);
    }
}

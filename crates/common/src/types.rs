//! Core types for ContractProbe

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// HTTP method of an endpoint or step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// Where a declared parameter lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Body,
}

/// A parameter declared on an endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "in")]
    pub location: ParameterLocation,
    #[serde(default)]
    pub required: bool,
}

/// One operation from the OpenAPI document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub path: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub operation_id: String,
    pub resource: String,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default)]
    pub request_schema: Option<Value>,
    #[serde(default)]
    pub response_schema: Option<Value>,
}

impl EndpointDescriptor {
    /// Display key used in logs and reports, e.g. `GET /widgets/{id}`
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Endpoints sharing a resource name, in catalog order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointGroup {
    pub resource: String,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// The GET/DELETE/POST triad a full-mode probe needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTriad {
    pub get: EndpointDescriptor,
    pub delete: EndpointDescriptor,
    pub post: EndpointDescriptor,
}

impl EndpointGroup {
    /// Returns the triad if the group exposes GET, DELETE and POST.
    ///
    /// The GET whose path matches the DELETE path is preferred, so the probe
    /// reads back the same item it removes.
    pub fn triad(&self) -> Option<ResourceTriad> {
        let delete = self.endpoints.iter().find(|e| e.method == HttpMethod::Delete)?;
        let post = self.endpoints.iter().find(|e| e.method == HttpMethod::Post)?;
        let get = self
            .endpoints
            .iter()
            .find(|e| e.method == HttpMethod::Get && e.path == delete.path)
            .or_else(|| self.endpoints.iter().find(|e| e.method == HttpMethod::Get))?;

        Some(ResourceTriad {
            get: get.clone(),
            delete: delete.clone(),
            post: post.clone(),
        })
    }
}

/// Names of the `{placeholder}` segments in a path template, in order
pub fn path_placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                names.push(after[..close].to_string());
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

/// Substitute bound placeholders; unbound ones are left in place.
///
/// Values are percent-encoded as single path segments.
pub fn substitute_path(template: &str, bindings: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for name in path_placeholders(template) {
        if let Some(value) = bindings.get(&name) {
            out = out.replace(&format!("{{{}}}", name), &urlencoding::encode(value));
        }
    }
    out
}

fn default_fixture_method() -> HttpMethod {
    HttpMethod::Post
}

fn default_cleanup_method() -> HttpMethod {
    HttpMethod::Delete
}

fn default_expected_status() -> u16 {
    201
}

fn default_priority() -> i32 {
    100
}

/// A predefined request used to probe a POST endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureCase {
    /// Unique case identifier, referenced by `depends_on`
    pub id: String,

    /// Path template of the endpoint under test
    pub endpoint: String,

    #[serde(default = "default_fixture_method")]
    pub method: HttpMethod,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub path_params: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<Value>,

    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    /// Endpoint to GET after a successful POST
    #[serde(default)]
    pub verify_endpoint: Option<String>,

    #[serde(default)]
    pub cleanup_endpoint: Option<String>,

    #[serde(default = "default_cleanup_method")]
    pub cleanup_method: HttpMethod,

    #[serde(default)]
    pub cleanup_body: Option<Value>,

    /// Case ids that must finish before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Lower runs earlier
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub module: Option<String>,
}

/// Kind of an observed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Auth,
    Get,
    Delete,
    Post,
    Verify,
    Compare,
    Validate,
    Cleanup,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::Auth => "AUTH",
            StepKind::Get => "GET",
            StepKind::Delete => "DELETE",
            StepKind::Post => "POST",
            StepKind::Verify => "VERIFY",
            StepKind::Compare => "COMPARE",
            StepKind::Validate => "VALIDATE",
            StepKind::Cleanup => "CLEANUP",
        };
        f.write_str(name)
    }
}

/// One observed action within a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStep {
    pub kind: StepKind,
    pub method: Option<HttpMethod>,
    pub url: String,
    pub status: Option<u16>,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TestStep {
    pub fn new(kind: StepKind, method: Option<HttpMethod>, url: impl Into<String>) -> Self {
        Self {
            kind,
            method,
            url: url.into(),
            status: None,
            payload: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// True when the step carries no error and any status is 2xx
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.status.map_or(true, |s| (200..300).contains(&s))
    }
}

/// Terminal state of a plan entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Passed => write!(f, "passed"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Kind of a structural difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

impl DiffKind {
    /// The kind seen from the other side of the comparison
    pub fn inverse(self) -> Self {
        match self {
            DiffKind::Added => DiffKind::Removed,
            DiffKind::Removed => DiffKind::Added,
            DiffKind::Changed => DiffKind::Changed,
        }
    }
}

/// A single difference between an expected and an actual JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Difference {
    pub path: String,
    pub expected: Option<Value>,
    pub actual: Option<Value>,
    #[serde(rename = "type")]
    pub kind: DiffKind,
}

impl std::fmt::Display for Difference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |v: &Option<Value>| v.as_ref().map_or_else(|| "<absent>".to_string(), |v| v.to_string());
        write!(
            f,
            "{} {}: expected {}, actual {}",
            match self.kind {
                DiffKind::Added => "added",
                DiffKind::Removed => "removed",
                DiffKind::Changed => "changed",
            },
            self.path,
            show(&self.expected),
            show(&self.actual)
        )
    }
}

/// Result of one plan entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Resource name, endpoint key or fixture case id
    pub id: String,
    pub outcome: Outcome,
    pub steps: Vec<TestStep>,
    #[serde(default)]
    pub differences: Vec<Difference>,
    pub duration_ms: u64,
    /// Step at which the entry terminated unsuccessfully
    #[serde(default)]
    pub failed_step: Option<StepKind>,
    #[serde(default)]
    pub reason: Option<String>,
    /// Non-fatal problems, e.g. a failed cleanup
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl TestResult {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            outcome: Outcome::Passed,
            steps: Vec::new(),
            differences: Vec::new(),
            duration_ms: 0,
            failed_step: None,
            reason: None,
            warnings: Vec::new(),
        }
    }

    /// A result that never ran
    pub fn skipped(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skipped,
            reason: Some(reason.into()),
            ..Self::new(id)
        }
    }

    pub fn cancelled(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Cancelled,
            reason: Some(reason.into()),
            ..Self::new(id)
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Outcome counts across a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl Totals {
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut totals = Totals {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.outcome {
                Outcome::Passed => totals.passed += 1,
                Outcome::Failed => totals.failed += 1,
                Outcome::Skipped => totals.skipped += 1,
                Outcome::Cancelled => totals.cancelled += 1,
            }
        }
        totals
    }
}

/// Final output of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub totals: Totals,
    pub results: Vec<TestResult>,
}

impl RunReport {
    /// Build a report, deriving totals and status from the results.
    ///
    /// A run passes iff every non-skipped result passed; an empty run passes.
    pub fn new(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        results: Vec<TestResult>,
        cancelled: bool,
    ) -> Self {
        let totals = Totals::from_results(&results);
        let status = if cancelled || totals.cancelled > 0 {
            RunStatus::Cancelled
        } else if totals.failed > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };

        Self {
            run_id: run_id.into(),
            status,
            started_at,
            duration_ms,
            totals,
            results,
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// One-line summary in the runner's usual format
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} skipped, {} cancelled ({} ms)",
            self.totals.passed,
            self.totals.failed,
            self.totals.skipped,
            self.totals.cancelled,
            self.duration_ms
        )
    }
}

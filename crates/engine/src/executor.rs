//! Test executor - drives one plan entry through its step sequence
//!
//! ```text
//! full:     AUTH? -> GET -> DELETE -> POST -> VERIFY -> COMPARE
//! readonly: AUTH? -> GET
//! fixture:  AUTH? -> POST -> VALIDATE -> VERIFY? -> CLEANUP?
//! ```
//!
//! Every transition appends exactly one [`TestStep`]. Steps are never
//! retried. AUTH is only recorded when the entry's token request actually
//! went to the network.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use contractprobe_common::{
    path_placeholders, substitute_path, EventLog, FixtureCase, HttpMethod, Outcome, ResourceTriad,
    RunConfig, ServerFieldConfig, StepKind, TestResult, TestStep,
};

use crate::auth::Authenticator;
use crate::diff::DiffEngine;
use crate::error::EngineResult;
use crate::http::{join_url, ApiRequest, ApiResponse, HttpTransport};
use crate::planner::{EntryKind, PlanEntry};

/// Array fields searched when discovering a live id from a collection
const COLLECTION_FIELDS: &[&str] = &["items", "data", "results"];

/// Settings the executor takes from the run configuration
#[derive(Debug, Clone, Default)]
pub struct ExecutorSettings {
    pub base_url: String,
    pub path_params: HashMap<String, String>,
    pub server_fields: ServerFieldConfig,
    pub skip_verify: bool,
    pub skip_cleanup: bool,
    pub use_real_data: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            path_params: config.path_params.clone(),
            server_fields: config.server_fields.clone(),
            skip_verify: config.skip_verify,
            skip_cleanup: config.skip_cleanup,
            use_real_data: config.use_real_data,
        }
    }
}

/// Step log of the entry being executed
struct Trace {
    result: TestResult,
    started: Instant,
}

impl Trace {
    fn new(id: &str) -> Self {
        Self {
            result: TestResult::new(id),
            started: Instant::now(),
        }
    }

    fn push(&mut self, step: TestStep) {
        self.result.steps.push(step);
    }

    fn finish(mut self, outcome: Outcome) -> TestResult {
        self.result.outcome = outcome;
        self.result.duration_ms = self.started.elapsed().as_millis() as u64;
        self.result
    }

    fn fail(mut self, step: StepKind, reason: impl Into<String>) -> TestResult {
        self.result.failed_step = Some(step);
        self.result.reason = Some(reason.into());
        self.finish(Outcome::Failed)
    }

    fn cancel(mut self, before: StepKind) -> TestResult {
        self.result.reason = Some(format!("cancelled before {}", before));
        self.finish(Outcome::Cancelled)
    }
}

/// Runs plan entries
pub struct Executor {
    transport: Arc<dyn HttpTransport>,
    auth: Option<Arc<Authenticator>>,
    settings: ExecutorSettings,
    diff: DiffEngine,
    events: EventLog,
}

impl Executor {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Option<Arc<Authenticator>>,
        settings: ExecutorSettings,
        diff: DiffEngine,
        events: EventLog,
    ) -> Self {
        Self {
            transport,
            auth,
            settings,
            diff,
            events,
        }
    }

    /// Execute one entry to a terminal state.
    ///
    /// Only authentication failures are returned as errors; everything else
    /// ends up in the `TestResult`.
    pub async fn execute(&self, entry: &PlanEntry, cancel: &CancellationToken) -> EngineResult<TestResult> {
        let mut trace = Trace::new(&entry.id);
        self.events.info(format!("▶ {}", entry.id));

        let bearer = self.authorize(&mut trace).await?;

        let result = match &entry.kind {
            EntryKind::Full { resource, triad } => {
                self.run_full(trace, resource, triad, bearer, cancel).await
            }
            EntryKind::Readonly { endpoint } => {
                self.run_readonly(trace, &endpoint.path, bearer).await
            }
            EntryKind::Fixture { case } => self.run_fixture(trace, case, bearer, cancel).await,
        };

        self.report(&result);
        Ok(result)
    }

    async fn authorize(&self, trace: &mut Trace) -> EngineResult<Option<String>> {
        let Some(auth) = &self.auth else {
            return Ok(None);
        };
        let grant = auth.get_valid_token().await?;
        if grant.refreshed {
            trace.push(TestStep::new(StepKind::Auth, Some(HttpMethod::Post), auth.token_url()).with_status(200));
        }
        Ok(Some(grant.bearer))
    }

    fn report(&self, result: &TestResult) {
        match result.outcome {
            Outcome::Passed => self.events.success(format!(
                "{} passed ({} ms)",
                result.id, result.duration_ms
            )),
            Outcome::Failed => self.events.error(format!(
                "{} failed at {}: {}",
                result.id,
                result.failed_step.map(|s| s.to_string()).unwrap_or_default(),
                result.reason.as_deref().unwrap_or("unknown error")
            )),
            Outcome::Skipped | Outcome::Cancelled => self.events.warn(format!(
                "{} {}: {}",
                result.id,
                result.outcome,
                result.reason.as_deref().unwrap_or("")
            )),
        }
        for diff in &result.differences {
            self.events.error(format!("  {}", diff));
        }
    }

    /// Send one request and record it as a step.
    ///
    /// Returns the response on 2xx, otherwise a failure description.
    async fn call(
        &self,
        trace: &mut Trace,
        kind: StepKind,
        request: ApiRequest,
    ) -> Result<ApiResponse, String> {
        let method = request.method;
        let url = request.url.clone();
        let step = TestStep::new(kind, Some(method), &url);

        match self.transport.send(request).await {
            Ok(resp) => {
                trace.push(step.with_status(resp.status).with_payload(resp.body.clone()));
                if resp.is_success() {
                    self.events.info(format!("  {} {} {} -> {}", kind, method, url, resp.status));
                    Ok(resp)
                } else {
                    self.events.error(format!("  {} {} {} -> {}", kind, method, url, resp.status));
                    if resp.status == 401 {
                        // the next entry re-authenticates
                        if let Some(auth) = &self.auth {
                            auth.invalidate().await;
                        }
                    }
                    Err(format!("{} {} returned {}", method, url, resp.status))
                }
            }
            Err(e) => {
                trace.push(step.with_error(e.to_string()));
                self.events.error(format!("  {} {} {} failed: {}", kind, method, url, e));
                Err(format!("{} {} failed: {}", method, url, e))
            }
        }
    }

    fn url(&self, template: &str, bindings: &HashMap<String, String>) -> String {
        join_url(&self.settings.base_url, &substitute_path(template, bindings))
    }

    /// Bind every placeholder in `templates`, discovering live ids when enabled.
    ///
    /// Discovery GETs are recorded as GET steps.
    async fn resolve_bindings(
        &self,
        trace: &mut Trace,
        templates: &[&str],
        mut bindings: HashMap<String, String>,
        bearer: &Option<String>,
    ) -> Result<HashMap<String, String>, String> {
        for template in templates {
            for name in path_placeholders(template) {
                if bindings.contains_key(&name) {
                    continue;
                }
                if !self.settings.use_real_data {
                    return Err(format!("no binding for path parameter {{{}}}", name));
                }
                let value = self.discover(trace, template, &name, &bindings, bearer).await?;
                debug!("Discovered {{{}}} = {}", name, value);
                bindings.insert(name, value);
            }
        }
        Ok(bindings)
    }

    async fn discover(
        &self,
        trace: &mut Trace,
        template: &str,
        name: &str,
        bindings: &HashMap<String, String>,
        bearer: &Option<String>,
    ) -> Result<String, String> {
        let marker = format!("{{{}}}", name);
        let collection = template
            .find(&marker)
            .map(|pos| template[..pos].trim_end_matches('/'))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| format!("cannot derive a collection path for {{{}}}", name))?;

        let url = self.url(collection, bindings);
        let resp = self
            .call(trace, StepKind::Get, ApiRequest::get(url.clone()).bearer(bearer.clone()))
            .await?;

        resp.body
            .as_ref()
            .and_then(first_item_id)
            .ok_or_else(|| format!("no live id for {{{}}} found at {}", name, url))
    }

    async fn run_readonly(&self, mut trace: Trace, path: &str, bearer: Option<String>) -> TestResult {
        let bindings = match self
            .resolve_bindings(&mut trace, &[path], self.settings.path_params.clone(), &bearer)
            .await
        {
            Ok(b) => b,
            Err(reason) => return trace.fail(StepKind::Get, reason),
        };

        let url = self.url(path, &bindings);
        match self
            .call(&mut trace, StepKind::Get, ApiRequest::get(url).bearer(bearer))
            .await
        {
            Ok(_) => trace.finish(Outcome::Passed),
            Err(reason) => trace.fail(StepKind::Get, reason),
        }
    }

    async fn run_full(
        &self,
        mut trace: Trace,
        resource: &str,
        triad: &ResourceTriad,
        bearer: Option<String>,
        cancel: &CancellationToken,
    ) -> TestResult {
        let templates = [
            triad.get.path.as_str(),
            triad.delete.path.as_str(),
            triad.post.path.as_str(),
        ];
        let bindings = match self
            .resolve_bindings(&mut trace, &templates, self.settings.path_params.clone(), &bearer)
            .await
        {
            Ok(b) => b,
            Err(reason) => return trace.fail(StepKind::Get, reason),
        };

        // GET
        let get_url = self.url(&triad.get.path, &bindings);
        let original = match self
            .call(&mut trace, StepKind::Get, ApiRequest::get(get_url.clone()).bearer(bearer.clone()))
            .await
        {
            Ok(resp) => resp.body.unwrap_or(Value::Null),
            Err(reason) => return trace.fail(StepKind::Get, reason),
        };

        if cancel.is_cancelled() {
            return trace.cancel(StepKind::Delete);
        }

        // DELETE
        let delete_url = self.url(&triad.delete.path, &bindings);
        let delete = ApiRequest::new(HttpMethod::Delete, delete_url).bearer(bearer.clone());
        if let Err(reason) = self.call(&mut trace, StepKind::Delete, delete).await {
            return trace.fail(StepKind::Delete, reason);
        }

        // POST follows DELETE without a cancellation check; stopping here would lose the resource
        let body = strip_fields(&original, self.settings.server_fields.for_resource(resource));
        let post_url = self.url(&triad.post.path, &bindings);
        let post = ApiRequest::new(HttpMethod::Post, post_url).json(body).bearer(bearer.clone());
        let created = match self.call(&mut trace, StepKind::Post, post).await {
            Ok(resp) => resp.body,
            Err(reason) => {
                self.events.critical(format!(
                    "{}: recreate failed after DELETE, original data lost: {}",
                    resource, original
                ));
                trace.result.warnings.push("original data lost".to_string());
                return trace.fail(StepKind::Post, reason);
            }
        };

        if self.settings.skip_verify {
            return trace.finish(Outcome::Passed);
        }
        if cancel.is_cancelled() {
            return trace.cancel(StepKind::Verify);
        }

        // VERIFY, following a server-assigned id if the POST returned one
        let verify_bindings = rebind_from_response(&triad.get.path, bindings, created.as_ref());
        let verify_url = self.url(&triad.get.path, &verify_bindings);
        let current = match self
            .call(&mut trace, StepKind::Verify, ApiRequest::get(verify_url.clone()).bearer(bearer))
            .await
        {
            Ok(resp) => resp.body.unwrap_or(Value::Null),
            Err(reason) => return trace.fail(StepKind::Verify, reason),
        };

        // COMPARE
        let differences = self.diff.diff(&original, &current);
        trace.push(
            TestStep::new(StepKind::Compare, None, verify_url)
                .with_payload(Some(json!({ "differences": differences.len() }))),
        );
        if differences.is_empty() {
            trace.finish(Outcome::Passed)
        } else {
            let reason = format!("{} difference(s) after round trip", differences.len());
            trace.result.differences = differences;
            trace.fail(StepKind::Compare, reason)
        }
    }

    async fn run_fixture(
        &self,
        mut trace: Trace,
        case: &FixtureCase,
        bearer: Option<String>,
        cancel: &CancellationToken,
    ) -> TestResult {
        let mut initial = self.settings.path_params.clone();
        initial.extend(case.path_params.clone());
        let bindings = match self
            .resolve_bindings(&mut trace, &[case.endpoint.as_str()], initial, &bearer)
            .await
        {
            Ok(b) => b,
            Err(reason) => return trace.fail(StepKind::Post, reason),
        };

        // POST
        let url = self.url(&case.endpoint, &bindings);
        let mut request = ApiRequest::new(case.method, url.clone()).bearer(bearer.clone());
        if let Some(body) = &case.body {
            request = request.json(body.clone());
        }
        let method = request.method;
        let (status, created) = match self.transport.send(request).await {
            Ok(resp) => {
                trace.push(
                    TestStep::new(StepKind::Post, Some(method), &url)
                        .with_status(resp.status)
                        .with_payload(resp.body.clone()),
                );
                self.events.info(format!("  POST {} {} -> {}", method, url, resp.status));
                (resp.status, resp.body)
            }
            Err(e) => {
                trace.push(TestStep::new(StepKind::Post, Some(method), &url).with_error(e.to_string()));
                return trace.fail(StepKind::Post, format!("{} {} failed: {}", method, url, e));
            }
        };

        // VALIDATE
        let mut check = TestStep::new(StepKind::Validate, None, &url)
            .with_status(status)
            .with_payload(Some(json!({ "expected": case.expected_status, "actual": status })));
        if status != case.expected_status {
            let reason = format!("expected status {}, got {}", case.expected_status, status);
            check = check.with_error(reason.clone());
            trace.push(check);
            let result = trace.fail(StepKind::Validate, reason);
            return self.cleanup_after(result, case, &bindings, created.as_ref(), status, bearer).await;
        }
        trace.push(check);

        // VERIFY
        if let Some(verify) = case.verify_endpoint.as_deref().filter(|_| !self.settings.skip_verify) {
            if cancel.is_cancelled() {
                let result = trace.cancel(StepKind::Verify);
                return self.cleanup_after(result, case, &bindings, created.as_ref(), status, bearer).await;
            }
            let verify_bindings = rebind_from_response(verify, bindings.clone(), created.as_ref());
            let verify_url = self.url(verify, &verify_bindings);
            if let Err(reason) = self
                .call(&mut trace, StepKind::Verify, ApiRequest::get(verify_url).bearer(bearer.clone()))
                .await
            {
                let result = trace.fail(StepKind::Verify, reason);
                return self.cleanup_after(result, case, &bindings, created.as_ref(), status, bearer).await;
            }
        }

        let result = trace.finish(Outcome::Passed);
        self.cleanup_after(result, case, &bindings, created.as_ref(), status, bearer).await
    }

    /// Run the fixture's cleanup if the POST created something.
    ///
    /// A failed cleanup is a warning; it never changes the outcome.
    async fn cleanup_after(
        &self,
        result: TestResult,
        case: &FixtureCase,
        bindings: &HashMap<String, String>,
        created: Option<&Value>,
        post_status: u16,
        bearer: Option<String>,
    ) -> TestResult {
        let Some(endpoint) = case.cleanup_endpoint.as_deref() else {
            return result;
        };
        if self.settings.skip_cleanup {
            debug!("Cleanup skipped for {}", case.id);
            return result;
        }
        if !(200..300).contains(&post_status) {
            return result;
        }

        let prior_ms = result.duration_ms;
        let mut trace = Trace {
            result,
            started: Instant::now(),
        };

        let cleanup_bindings = rebind_from_response(endpoint, bindings.clone(), created);
        let url = self.url(endpoint, &cleanup_bindings);
        let unbound = path_placeholders(endpoint)
            .into_iter()
            .find(|p| !cleanup_bindings.contains_key(p));

        let outcome = match unbound {
            Some(name) => {
                let reason = format!("no binding for path parameter {{{}}}", name);
                trace.push(
                    TestStep::new(StepKind::Cleanup, Some(case.cleanup_method), &url)
                        .with_error(reason.clone()),
                );
                Err(reason)
            }
            None => {
                let mut request = ApiRequest::new(case.cleanup_method, url).bearer(bearer);
                if let Some(body) = &case.cleanup_body {
                    request = request.json(body.clone());
                }
                self.call(&mut trace, StepKind::Cleanup, request).await.map(|_| ())
            }
        };

        if let Err(reason) = outcome {
            self.events.warn(format!("{}: cleanup failed: {}", case.id, reason));
            trace.result.warnings.push(format!("cleanup failed: {}", reason));
        }

        let mut result = trace.result;
        result.duration_ms = prior_ms + trace.started.elapsed().as_millis() as u64;
        result
    }
}

/// Remove server-assigned fields (top-level keys or `/`-separated paths)
pub fn strip_fields(body: &Value, fields: &[String]) -> Value {
    let mut body = body.clone();
    for field in fields {
        let segments: Vec<&str> = field.trim_matches('/').split('/').collect();
        remove_path(&mut body, &segments);
    }
    body
}

fn remove_path(value: &mut Value, segments: &[&str]) {
    match segments {
        [] => {}
        [last] => {
            if let Value::Object(map) = value {
                map.remove(*last);
            }
        }
        [head, rest @ ..] => {
            if let Some(child) = value.as_object_mut().and_then(|m| m.get_mut(*head)) {
                remove_path(child, rest);
            }
        }
    }
}

/// Take placeholder values from a response body's top-level scalar fields
fn rebind_from_response(
    template: &str,
    mut bindings: HashMap<String, String>,
    response: Option<&Value>,
) -> HashMap<String, String> {
    let Some(Value::Object(fields)) = response else {
        return bindings;
    };
    for name in path_placeholders(template) {
        if let Some(value) = fields.get(&name).and_then(scalar_string) {
            bindings.insert(name, value);
        }
    }
    bindings
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `id` of the first element of a collection response
fn first_item_id(body: &Value) -> Option<String> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(map) => COLLECTION_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_array))?,
        _ => return None,
    };
    items.first()?.get("id").and_then(scalar_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fields() {
        let body = json!({"id": 1, "name": "foo", "meta": {"createdAt": "t", "owner": "x"}});
        let stripped = strip_fields(&body, &["id".to_string(), "meta/createdAt".to_string()]);
        assert_eq!(stripped, json!({"name": "foo", "meta": {"owner": "x"}}));
    }

    #[test]
    fn test_first_item_id() {
        assert_eq!(first_item_id(&json!([{"id": 7}, {"id": 8}])), Some("7".to_string()));
        assert_eq!(first_item_id(&json!({"items": [{"id": "abc"}]})), Some("abc".to_string()));
        assert_eq!(first_item_id(&json!({"data": []})), None);
        assert_eq!(first_item_id(&json!({"id": 1})), None);
    }

    #[test]
    fn test_rebind_from_response() {
        let mut bindings = HashMap::new();
        bindings.insert("id".to_string(), "1".to_string());
        let rebound = rebind_from_response("/widgets/{id}", bindings, Some(&json!({"id": 42, "name": "n"})));
        assert_eq!(rebound["id"], "42");
    }
}

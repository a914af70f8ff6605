//! Scripted in-memory API shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use contractprobe_common::{EndpointDescriptor, HttpMethod, RunConfig};
use contractprobe_engine::{ApiRequest, ApiResponse, Catalog, HttpTransport, RequestBody, TransportError};

pub const BASE_URL: &str = "http://api.test";

/// A request as the scripted API saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: HttpMethod,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// Answers from per-route response queues.
///
/// The last queued response for a route repeats; unknown routes get 404.
#[derive(Default)]
pub struct ScriptedApi {
    routes: Mutex<HashMap<(HttpMethod, String), VecDeque<ApiResponse>>>,
    calls: Mutex<Vec<Recorded>>,
    delay: Option<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: HttpMethod, path: &str, status: u16, body: Option<Value>) -> Self {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(ApiResponse::new(status, body));
        self
    }

    /// Sleep this long inside every request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Trip `token` as soon as the first request completes
    pub fn cancel_after_first(self, token: CancellationToken) -> Self {
        self.cancel_after(1, token)
    }

    /// Trip `token` once `requests` requests have completed
    pub fn cancel_after(mut self, requests: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((requests, token));
        self
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: HttpMethod, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for ScriptedApi {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let path = request
            .url
            .strip_prefix(BASE_URL)
            .unwrap_or(&request.url)
            .to_string();
        let body = match &request.body {
            Some(RequestBody::Json(value)) => Some(value.clone()),
            _ => None,
        };
        self.calls.lock().push(Recorded {
            method: request.method,
            path: path.clone(),
            body,
            bearer: request.bearer.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = {
            let mut routes = self.routes.lock();
            match routes.get_mut(&(request.method, path)) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if completed >= *after {
                token.cancel();
            }
        }
        Ok(response.unwrap_or_else(|| ApiResponse::new(404, None)))
    }
}

pub fn endpoint(method: HttpMethod, path: &str, resource: &str) -> EndpointDescriptor {
    EndpointDescriptor {
        path: path.to_string(),
        method,
        operation_id: String::new(),
        resource: resource.to_string(),
        parameters: vec![],
        request_schema: None,
        response_schema: None,
    }
}

/// GET/DELETE on `/widgets/{id}` plus POST on `/widgets`
pub fn widgets_catalog() -> Catalog {
    Catalog::new(vec![
        endpoint(HttpMethod::Get, "/widgets/{id}", "widgets"),
        endpoint(HttpMethod::Delete, "/widgets/{id}", "widgets"),
        endpoint(HttpMethod::Post, "/widgets", "widgets"),
    ])
}

/// Route engine logs to the test harness; repeated calls are harmless
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

pub fn config() -> RunConfig {
    RunConfig {
        base_url: BASE_URL.to_string(),
        ..Default::default()
    }
}

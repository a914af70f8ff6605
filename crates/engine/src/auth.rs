//! Bearer-token authentication
//!
//! Tokens come from an OAuth2 password-grant endpoint. The cached token is
//! guarded by an async mutex held across the refresh, so concurrent callers
//! wait for the first caller's exchange instead of issuing their own.

use contractprobe_common::AuthConfig;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::http::{join_url, ApiRequest, HttpTransport};

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A bearer token and its expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub bearer: String,
    /// `None` when the server gave no expiry; such tokens are single-use
    pub expires_at: Option<Instant>,
}

impl AuthToken {
    /// True if the token can be handed out without a refresh
    pub fn is_fresh(&self, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at.saturating_duration_since(Instant::now()) > margin,
            None => false,
        }
    }
}

/// Token handed to a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub bearer: String,
    /// This call performed the network exchange
    pub refreshed: bool,
}

/// Exchange credentials for a token.
///
/// Fails with [`EngineError::Auth`] on a transport error, a non-2xx status or
/// a payload without `access_token`.
pub async fn authenticate(
    transport: &dyn HttpTransport,
    token_url: &str,
    username: &str,
    password: &str,
    client_id: Option<&str>,
) -> EngineResult<AuthToken> {
    let mut form = vec![
        ("grant_type".to_string(), "password".to_string()),
        ("username".to_string(), username.to_string()),
        ("password".to_string(), password.to_string()),
    ];
    if let Some(client_id) = client_id {
        form.push(("client_id".to_string(), client_id.to_string()));
    }

    let resp = transport
        .send(ApiRequest::new(contractprobe_common::HttpMethod::Post, token_url).form(form))
        .await
        .map_err(|e| EngineError::Auth(format!("token request to {} failed: {}", token_url, e)))?;

    if !resp.is_success() {
        return Err(EngineError::Auth(format!(
            "token endpoint {} returned {}",
            token_url, resp.status
        )));
    }

    let body = resp
        .body
        .ok_or_else(|| EngineError::Auth("token endpoint returned an empty body".to_string()))?;
    let token: TokenResponse = serde_json::from_value(body)
        .map_err(|e| EngineError::Auth(format!("malformed token payload: {}", e)))?;
    if token.access_token.is_empty() {
        return Err(EngineError::Auth("token payload has an empty access_token".to_string()));
    }

    Ok(AuthToken {
        bearer: token.access_token,
        expires_at: token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs)),
    })
}

/// Caches a token for the duration of a run
pub struct Authenticator {
    transport: Arc<dyn HttpTransport>,
    token_url: String,
    username: String,
    password: String,
    client_id: Option<String>,
    margin: Duration,
    cached: Mutex<Option<AuthToken>>,
    refreshes: AtomicUsize,
}

impl Authenticator {
    /// Build from config; a relative `token_url` is resolved against `base_url`
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: &str, config: &AuthConfig) -> Self {
        Self {
            transport,
            token_url: join_url(base_url, &config.token_url),
            username: config.username.clone(),
            password: config.password.clone(),
            client_id: config.client_id.clone(),
            margin: Duration::from_secs(config.refresh_margin_secs),
            cached: Mutex::new(None),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Number of network exchanges performed so far
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Return a usable token, refreshing if absent or within the margin of expiry.
    ///
    /// Single-use tokens (no expiry) are never cached.
    pub async fn get_valid_token(&self) -> EngineResult<TokenGrant> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(self.margin) {
                return Ok(TokenGrant {
                    bearer: token.bearer.clone(),
                    refreshed: false,
                });
            }
            debug!("Token within {}s of expiry, refreshing", self.margin.as_secs());
        }

        let token = authenticate(
            self.transport.as_ref(),
            &self.token_url,
            &self.username,
            &self.password,
            self.client_id.as_deref(),
        )
        .await?;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!("Obtained bearer token from {}", self.token_url);

        let bearer = token.bearer.clone();
        if token.expires_at.is_some() {
            *cached = Some(token);
        } else {
            *cached = None;
        }

        Ok(TokenGrant {
            bearer,
            refreshed: true,
        })
    }

    /// Drop the cached token
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

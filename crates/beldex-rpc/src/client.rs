//! JSON transport to the daemon.
//!
//! The daemon answers two kinds of request: JSON-RPC methods posted to
//! `/json_rpc`, and plain JSON endpoints such as `/get_outs`. Both share one
//! retrying POST path. [`RpcClient::call`] unwraps the JSON-RPC envelope;
//! [`RpcClient::post`] returns the endpoint's object as is. Either way a
//! `BUSY` status (the daemon is still syncing) comes back as
//! [`RpcError::Busy`] and is retried.

use crate::error::RpcError;
use crate::ports;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Longest error body kept in an [`RpcError::HttpStatus`].
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy)]
enum Route<'a> {
    Method(&'a str),
    Endpoint(&'a str),
}

impl Route<'_> {
    fn name(&self) -> &str {
        match self {
            Route::Method(m) => m,
            Route::Endpoint(e) => e.trim_start_matches('/'),
        }
    }

    fn path(&self) -> &str {
        match self {
            Route::Method(_) => "/json_rpc",
            Route::Endpoint(e) => e,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Deserialize)]
struct ReplyError {
    code: i64,
    message: String,
}

/// Daemon connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Daemon base URL, e.g. `http://127.0.0.1:19091`.
    pub url: String,
    /// `(user, password)` for daemons started with `--rpc-login`.
    pub login: Option<(String, String)>,
    pub timeout: Duration,
    /// Extra attempts after a retryable failure.
    pub retries: u32,
    /// Wait before the first retry; doubles on each further one.
    pub retry_delay: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: format!("http://127.0.0.1:{}", ports::DAEMON_MAINNET),
            login: None,
            timeout: Duration::from_secs(30),
            retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

fn login_header(user: &str, password: &str) -> Result<HeaderValue, RpcError> {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    let mut value = HeaderValue::from_str(&format!("Basic {token}"))
        .map_err(|e| RpcError::Other(format!("invalid daemon login: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// `BUSY` in a reply's `status` field means the daemon cannot serve yet.
fn check_busy(route: Route<'_>, reply: &Value) -> Result<(), RpcError> {
    match reply.get("status").and_then(Value::as_str) {
        Some("BUSY") => Err(RpcError::Busy { context: route.name().to_string() }),
        _ => Ok(()),
    }
}

/// Async daemon client.
pub struct RpcClient {
    http: reqwest::Client,
    config: RpcConfig,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_config(RpcConfig { url: url.to_string(), ..Default::default() })
    }

    pub fn with_config(mut config: RpcConfig) -> Result<Self, RpcError> {
        config.url = config.url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some((user, password)) = &config.login {
            headers.insert(AUTHORIZATION, login_header(user, password)?);
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .pool_max_idle_per_host(2)
            .build()
            .map_err(|e| RpcError::Other(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { http, config, next_id: AtomicU64::new(0) })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.config.retry_delay.saturating_mul(factor)
    }

    /// Call a JSON-RPC method and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = serde_json::to_value(Envelope { jsonrpc: "2.0", id, method, params: &params })?;
        let route = Route::Method(method);
        let reply: Reply = serde_json::from_value(self.send(route, &envelope).await?)?;
        if let Some(err) = reply.error {
            if err.message == "BUSY" {
                return Err(RpcError::Busy { context: method.to_string() });
            }
            return Err(RpcError::Rpc { code: err.code, message: err.message, method: method.to_string() });
        }
        reply.result.ok_or_else(|| RpcError::NoResult { context: method.to_string() })
    }

    /// POST to a plain JSON endpoint such as `/get_outs`.
    pub async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, RpcError> {
        self.send(Route::Endpoint(endpoint), body).await
    }

    async fn send(&self, route: Route<'_>, body: &Value) -> Result<Value, RpcError> {
        let mut retry = 0;
        loop {
            let outcome = match self.send_once(route, body).await {
                Ok(reply) => check_busy(route, &reply).map(|()| reply),
                Err(e) => Err(e),
            };
            match outcome {
                Err(e) if e.is_retryable() && retry < self.config.retries => {
                    retry += 1;
                    log::warn!("{} failed ({e}), retry {retry}/{}", route.name(), self.config.retries);
                    tokio::time::sleep(self.backoff(retry)).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(&self, route: Route<'_>, body: &Value) -> Result<Value, RpcError> {
        let url = format!("{}{}", self.config.url, route.path());
        let http_error = |source| RpcError::Http { method: route.name().to_string(), url: url.clone(), source };
        let resp = self.http.post(&url).json(body).send().await.map_err(http_error)?;

        let status = resp.status().as_u16();
        if status == 401 {
            return Err(RpcError::AuthFailed { url: url.clone() });
        }
        if status >= 400 {
            let text = resp.text().await.unwrap_or_default();
            return Err(RpcError::HttpStatus {
                method: route.name().to_string(),
                url: url.clone(),
                status,
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }
        resp.json().await.map_err(http_error)
    }
}

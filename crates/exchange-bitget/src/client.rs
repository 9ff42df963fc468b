//! Rate-limited, retrying REST client for the Bitget mix v2 API.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Method;
use tracing::warn;

use grid_hedge_core::error::ExchangeError;

use crate::auth::BitgetAuth;
use crate::types::ApiEnvelope;

/// Bitget production API base URL (demo accounts use the same host).
pub const BITGET_API_URL: &str = "https://api.bitget.com";

#[derive(Debug, Clone)]
pub struct BitgetClientConfig {
    pub base_url: String,
    /// Per-request deadline.
    pub timeout_secs: u64,
    /// Attempts per request for transient failures.
    pub max_retries: u32,
    pub requests_per_second: NonZeroU32,
}

impl Default for BitgetClientConfig {
    fn default() -> Self {
        Self {
            base_url: BITGET_API_URL.to_string(),
            timeout_secs: 10,
            max_retries: 3,
            requests_per_second: nonzero!(20u32),
        }
    }
}

impl BitgetClientConfig {
    /// Sets the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the request deadline.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

pub struct BitgetClient {
    http: reqwest::Client,
    auth: BitgetAuth,
    config: BitgetClientConfig,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl BitgetClient {
    #[must_use]
    pub fn new(auth: BitgetAuth, config: BitgetClientConfig) -> Self {
        let quota = Quota::per_second(config.requests_per_second);
        Self {
            http: reqwest::Client::new(),
            auth,
            config,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    #[must_use]
    pub fn auth(&self) -> &BitgetAuth {
        &self.auth
    }

    /// Signed GET with sorted query parameters.
    ///
    /// # Errors
    /// Returns the mapped exchange error after the retry budget is spent.
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ExchangeError> {
        let request_path = build_request_path(path, params);
        self.request(Method::GET, &request_path, String::new()).await
    }

    /// Signed POST with a JSON body.
    ///
    /// # Errors
    /// Returns the mapped exchange error after the retry budget is spent.
    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.request(Method::POST, path, body.to_string()).await
    }

    async fn request(
        &self,
        method: Method,
        request_path: &str,
        body: String,
    ) -> Result<serde_json::Value, ExchangeError> {
        let url = format!("{}{}", self.config.base_url, request_path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.until_ready().await;

            // Headers are rebuilt per attempt so the signing timestamp stays
            // fresh across backoff sleeps.
            let headers = self.auth.headers(method.as_str(), request_path, &body)?;
            let mut request = self
                .http
                .request(method.clone(), &url)
                .timeout(Duration::from_secs(self.config.timeout_secs));
            for (key, value) in &headers {
                request = request.header(*key, value);
            }
            if !body.is_empty() {
                request = request
                    .header("Content-Type", "application/json")
                    .body(body.clone());
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 429 {
                        let wait = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(5);
                        ExchangeError::RateLimit {
                            retry_after_secs: wait,
                        }
                    } else {
                        let text = response.text().await.map_err(map_reqwest_error)?;
                        match serde_json::from_str::<ApiEnvelope>(&text) {
                            Ok(envelope) if envelope.code == "00000" => {
                                return Ok(envelope.data.unwrap_or(serde_json::Value::Null));
                            }
                            Ok(envelope) => classify_envelope(&envelope.code, &envelope.msg),
                            Err(_) if !status.is_success() => ExchangeError::Api {
                                status_code: status.as_u16(),
                                message: truncate(&text, 200),
                            },
                            Err(e) => ExchangeError::Serialization(e.to_string()),
                        }
                    }
                }
                Err(e) => map_reqwest_error(e),
            };

            if error.is_transient() && attempt < self.config.max_retries {
                let delay = error
                    .retry_delay_secs()
                    .unwrap_or(1)
                    .max(1u64 << (attempt - 1));
                warn!(%url, attempt, "transient exchange error, retrying in {delay}s: {error}");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }

            return Err(error);
        }
    }
}

/// Appends the query string with parameters sorted by key; the sorted order
/// is part of the signed payload.
fn build_request_path(path: &str, params: &[(&str, String)]) -> String {
    if params.is_empty() {
        return path.to_string();
    }
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let query: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{path}?{}", query.join("&"))
}

/// Maps an envelope error code onto the transport-independent taxonomy.
fn classify_envelope(code: &str, msg: &str) -> ExchangeError {
    let lower = msg.to_lowercase();
    if lower.contains("signature")
        || lower.contains("passphrase")
        || lower.contains("apikey")
        || lower.contains("api key")
        || lower.contains("auth")
    {
        return ExchangeError::Authentication(format!("[{code}] {msg}"));
    }
    if lower.contains("rate") && lower.contains("limit") {
        return ExchangeError::RateLimit {
            retry_after_secs: 5,
        };
    }
    if lower.contains("symbol does not exist") || lower.contains("symbol not found") {
        return ExchangeError::SymbolNotFound {
            symbol: msg.to_string(),
        };
    }
    ExchangeError::Exchange {
        code: code.to_string(),
        message: msg.to_string(),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ExchangeError {
    if err.is_timeout() {
        ExchangeError::Timeout(err.to_string())
    } else if err.is_connect() {
        ExchangeError::Network(format!("connection failed: {err}"))
    } else {
        ExchangeError::Network(err.to_string())
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

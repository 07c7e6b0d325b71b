//! REST transport for the hosting backend
//!
//! Requests are built with [`ApiRequest`] relative to the backend's `/api/v1`
//! prefix and sent through [`ApiClient`]. The backend reports failures as
//! `{"detail": ...}` bodies, which are surfaced through [`ApiError::message`].

use reqwest::{Client as ReqwestClient, Method, Response as ReqwestResponse};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

// =============================================================================
// Error Types
// =============================================================================

/// API error with HTTP status and message
///
/// Transport failures (connection refused, timeouts, undecodable bodies) use
/// status `0` and an error code describing the failure.
///
/// # Examples
/// ```
/// use api_client::http::ApiError;
///
/// let error = ApiError::new(401, "Unauthorized", "Incorrect email or password");
/// assert_eq!(error.status(), 401);
/// assert!(!error.is_network_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: u16,
    /// Error code (e.g., "Unauthorized", "NetworkError")
    code: String,
    message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { status, code: code.into(), message: message.into() }
    }

    /// No HTTP response was received
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(0, "NetworkError", message)
    }

    /// A response arrived but could not be read or decoded
    fn parse(message: impl Into<String>) -> Self {
        Self::new(0, "ParseError", message)
    }

    /// HTTP status code, `0` if there was no usable response
    pub fn status(&self) -> u16 {
        self.status
    }

    /// The backend's `detail`, or a description of the failure
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the request is worth retrying
    ///
    /// Retried statuses: 0 (no response), 408, 425, 429, 500, 502, 503, 504,
    /// 522, 524
    pub fn is_network_error(&self) -> bool {
        if self.status == 0 {
            return self.code == "NetworkError";
        }
        matches!(self.status, 408 | 425 | 429 | 500 | 502 | 503 | 504 | 522 | 524)
    }

    /// Whether the backend could not be reached or failed on its side
    pub fn is_transport_failure(&self) -> bool {
        self.status == 0 || self.status >= 500 || self.is_network_error()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API error {}: {} - {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Error body returned by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Either a message string or a list of validation failures
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// Flatten the detail into a displayable message
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

fn status_code_name(status: u16) -> &'static str {
    match status {
        400 => "BadRequest",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "Conflict",
        422 => "UnprocessableEntity",
        429 => "TooManyRequests",
        500..=599 => "ServerError",
        _ => "Unknown",
    }
}

// =============================================================================
// Requests
// =============================================================================

/// A request below the API prefix, e.g. `POST /auth/login`
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the API prefix
    pub path: String,
    /// Bearer token for the `Authorization` header
    pub bearer: Option<String>,
    /// JSON body
    pub body: Option<Vec<u8>>,
}

impl ApiRequest {
    fn with_method(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), bearer: None, body: None }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::with_method(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::with_method(Method::POST, path)
    }

    /// Authorize the request with a bearer token
    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    /// Set the request body from JSON
    pub fn json_body<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(value)?);
        Ok(self)
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the API client
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base service URL (e.g., "http://localhost:8000")
    pub base_url: String,
    /// Prefix under which the API is mounted
    pub api_prefix: String,
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Retry policy for idempotent requests
    pub retry: RetryConfig,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/api/v1".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("vmhost-console/{}", env!("CARGO_PKG_VERSION")),
            retry: RetryConfig::default(),
        }
    }
}

impl ApiClientConfig {
    /// Create a new config with a base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Default::default() }
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the absolute URL for a path below the API prefix
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}{}{}",
            self.base_url.trim_end_matches('/'),
            self.api_prefix.trim_end_matches('/'),
            path
        )
    }
}

// =============================================================================
// Retry Logic with Exponential Backoff
// =============================================================================

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Factor applied to the delay after each attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry up to `max_retries` times with the default backoff
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries, ..Default::default() }
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Retry an async operation while `should_retry` accepts its error
///
/// # Examples
/// ```
/// use api_client::http::{retry, ApiError, RetryConfig};
///
/// async fn example() -> Result<String, ApiError> {
///     retry(
///         RetryConfig::new(3),
///         |err: &ApiError| err.is_network_error(),
///         || async { Ok("success".to_string()) },
///     )
///     .await
/// }
/// ```
pub async fn retry<F, Fut, T, E>(
    config: RetryConfig,
    should_retry: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempts += 1;

                if !should_retry(&err) || attempts > config.max_retries {
                    return Err(err);
                }

                let delay = config.delay_for(attempts - 1);
                tracing::debug!(attempt = attempts, ?delay, "retrying request");
                sleep(delay).await;
            }
        }
    }
}

// =============================================================================
// API Client
// =============================================================================

/// HTTP client for the hosting backend
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: ReqwestClient,
    config: ApiClientConfig,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ApiError::new(0, "ClientBuild", format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client, config })
    }

    /// Send a request and decode the JSON response body
    pub async fn call<T>(&self, request: &ApiRequest) -> Result<T, ApiError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::parse(format!("Failed to read response: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| ApiError::parse(format!("Failed to parse JSON: {}", e)))
    }

    /// Like [`call`](Self::call), retrying transient failures
    ///
    /// Only use this for idempotent requests.
    pub async fn call_with_retry<T>(&self, request: &ApiRequest) -> Result<T, ApiError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let retry_policy = self.config.retry.clone();
        retry(retry_policy, ApiError::is_network_error, || self.call(request)).await
    }

    /// Send a request whose response body is irrelevant
    pub async fn call_no_content(&self, request: &ApiRequest) -> Result<(), ApiError> {
        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }
        Ok(())
    }

    async fn send(&self, request: &ApiRequest) -> Result<ReqwestResponse, ApiError> {
        let url = self.config.url_for(&request.path);
        let mut req = self.client.request(request.method.clone(), &url);

        if let Some(token) = &request.bearer {
            req = req.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            req = req.header("Content-Type", "application/json").body(body.clone());
        }

        tracing::debug!(method = %request.method, %url, "sending request");

        req.send()
            .await
            .map_err(|e| ApiError::network(format!("Request failed: {}", e)))
    }

    async fn error_from_response(response: ReqwestResponse) -> ApiError {
        let status = response.status().as_u16();
        let error_body = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ErrorBody>(&error_body) {
            Ok(body) => body.message(),
            Err(_) => format!("HTTP {}: {}", status, error_body),
        };
        ApiError::new(status, status_code_name(status), message)
    }
}

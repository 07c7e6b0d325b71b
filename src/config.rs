//! Console configuration
//!
//! Environment variables:
//! - `VMHOST_API_URL`: backend base URL (default `http://localhost:8000`)
//! - `VMHOST_DATA_DIR`: directory for the on-disk session store; when unset
//!   the session lives in memory only
//! - `VMHOST_TIMEOUT_SECS`: request timeout in seconds (default 30)
//! - `VMHOST_MAX_RETRIES`: retries for idempotent requests (default 2)
//! - `VMHOST_LOGOUT_PATH`: server endpoint notified on logout, e.g.
//!   `/auth/logout`; when unset logout is purely local

use anyhow::{Context, Result};
use api_client::{ApiClientConfig, RetryConfig};
use std::path::PathBuf;
use std::time::Duration;
use storage::KvConfig;

/// Default backend URL
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// File name of the session database inside the data directory
pub const SESSION_DB_FILE: &str = "session.db";

/// Settings for a console instance
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    /// Backend base URL
    pub api_url: String,
    /// Directory for durable session data; `None` keeps it in memory
    pub data_dir: Option<PathBuf>,
    /// Request timeout
    pub timeout: Duration,
    /// Retries for idempotent requests
    pub max_retries: usize,
    /// Server logout endpoint, below the API prefix
    pub logout_path: Option<String>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: None,
            timeout: Duration::from_secs(30),
            max_retries: RetryConfig::default().max_retries,
            logout_path: None,
        }
    }
}

impl ConsoleConfig {
    /// Configuration for the backend at `api_url`
    pub fn new(api_url: impl Into<String>) -> Self {
        Self { api_url: api_url.into(), ..Default::default() }
    }

    /// Read the configuration from `VMHOST_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let timeout = match var("VMHOST_TIMEOUT_SECS") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().with_context(|| {
                    format!("VMHOST_TIMEOUT_SECS must be a number of seconds, got {raw:?}")
                })?;
                Duration::from_secs(secs)
            }
            None => defaults.timeout,
        };

        let max_retries = match var("VMHOST_MAX_RETRIES") {
            Some(raw) => raw.trim().parse::<usize>().with_context(|| {
                format!("VMHOST_MAX_RETRIES must be a non-negative integer, got {raw:?}")
            })?,
            None => defaults.max_retries,
        };

        Ok(Self {
            api_url: var("VMHOST_API_URL").unwrap_or(defaults.api_url),
            data_dir: var("VMHOST_DATA_DIR").map(PathBuf::from),
            timeout,
            max_retries,
            logout_path: var("VMHOST_LOGOUT_PATH"),
        })
    }

    /// Keep session data on disk under `dir`
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count for idempotent requests
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Notify the server at `path` on logout
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = Some(path.into());
        self
    }

    /// Transport configuration derived from these settings
    pub fn api_client_config(&self) -> ApiClientConfig {
        ApiClientConfig::new(self.api_url.clone())
            .with_timeout(self.timeout)
            .with_retry(RetryConfig::new(self.max_retries))
    }

    /// On-disk store configuration, if a data directory is set
    pub fn kv_config(&self) -> Option<KvConfig> {
        self.data_dir
            .as_ref()
            .map(|dir| KvConfig::new(dir.join(SESSION_DB_FILE).to_string_lossy()))
    }
}

//! Authentication API client
//!
//! [`AuthApi`] is the boundary the session store talks to: exchange
//! credentials, create an account, fetch the current profile and invalidate
//! the session. [`HttpAuthApi`] implements it against the backend's REST API.
//!
//! # Example
//!
//! ```rust,no_run
//! use api_client::{ApiClient, ApiClientConfig, AuthApi, HttpAuthApi, TokenStore};
//! use std::sync::Arc;
//! use storage::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::new(ApiClientConfig::new("http://localhost:8000"))?;
//!     let tokens = TokenStore::new(Arc::new(MemoryStore::new()));
//!     let api = HttpAuthApi::new(client, tokens.clone());
//!
//!     let pair = api.exchange_credentials("alice@example.com", "password").await?;
//!     tokens.save(&pair)?;
//!
//!     let current = api.fetch_current_profile().await?;
//!     if let Some(rotated) = &current.rotated {
//!         tokens.save(rotated)?;
//!     }
//!     println!("Balance: {}", current.profile.balance);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::Duration;
use storage::KvError;
use thiserror::Error;

use crate::http::{ApiClient, ApiError, ApiRequest};
use crate::profile::{LoginRequest, NewAccount, RefreshRequest, TokenPair, UserProfile};
use crate::tokens::{self, TokenStore};

/// Errors reported by the authentication API
#[derive(Debug, Error)]
pub enum AuthError {
    /// Login or registration was rejected
    #[error("Credentials rejected: {0}")]
    Credentials(String),

    /// Too many attempts; the server asked us to back off
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The stored token is no longer accepted
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The backend could not be reached or failed on its side
    #[error("Transport error: {0}")]
    Transport(String),

    /// Token storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),
}

impl AuthError {
    /// Classify a failed login or registration
    pub fn from_credential_failure(err: ApiError) -> Self {
        if err.status() == 429 {
            AuthError::RateLimited(err.message().to_string())
        } else if err.is_transport_failure() {
            AuthError::Transport(err.to_string())
        } else {
            AuthError::Credentials(err.message().to_string())
        }
    }

    /// Classify a failed request made with a stored token
    pub fn from_session_failure(err: ApiError) -> Self {
        match err.status() {
            401 | 403 => AuthError::SessionExpired(err.message().to_string()),
            _ => AuthError::Transport(err.to_string()),
        }
    }

    /// Whether the error means the stored credentials are no longer valid
    pub fn is_session_expired(&self) -> bool {
        matches!(self, AuthError::SessionExpired(_))
    }
}

/// Result type for authentication operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Access tokens expiring within this window are refreshed before use
pub const REFRESH_LEEWAY_SECS: i64 = 30;

/// Profile of the signed-in account
///
/// If a refresh was needed to fetch it, `rotated` holds the new pair. It has
/// not been stored; the caller decides whether the session it was fetched
/// for is still current.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentProfile {
    /// The account profile
    pub profile: UserProfile,
    /// Tokens issued by a refresh along the way
    pub rotated: Option<TokenPair>,
}

impl CurrentProfile {
    /// Profile fetched with the stored token as is
    pub fn new(profile: UserProfile) -> Self {
        Self { profile, rotated: None }
    }

    /// Profile fetched after rotating to `pair`
    pub fn rotated(profile: UserProfile, pair: TokenPair) -> Self {
        Self { profile, rotated: Some(pair) }
    }
}

/// Boundary to the backend's authentication endpoints
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Trade an email/password pair for tokens
    async fn exchange_credentials(&self, email: &str, password: &str) -> Result<TokenPair>;

    /// Create an account and receive its first tokens
    async fn create_account(&self, account: &NewAccount) -> Result<TokenPair>;

    /// Fetch the profile belonging to the stored access token
    ///
    /// Never writes tokens. A refresh made along the way is reported in
    /// [`CurrentProfile::rotated`].
    async fn fetch_current_profile(&self) -> Result<CurrentProfile>;

    /// Invalidate the current session
    ///
    /// Best-effort: never fails and never blocks on the network. Stored tokens
    /// are gone by the time this returns.
    fn invalidate_session(&self);
}

/// [`AuthApi`] over the backend's REST endpoints
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    client: ApiClient,
    tokens: TokenStore,
    logout_path: Option<String>,
}

impl HttpAuthApi {
    /// Create a client reading and rotating tokens through `tokens`
    pub fn new(client: ApiClient, tokens: TokenStore) -> Self {
        Self { client, tokens, logout_path: None }
    }

    /// Also notify the server on logout by POSTing to `path`
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = Some(path.into());
        self
    }

    /// Exchange the stored refresh token for a new pair
    ///
    /// The pair is returned, not stored.
    pub async fn refresh_tokens(&self) -> Result<TokenPair> {
        let refresh_token = self
            .tokens
            .refresh_token()?
            .ok_or_else(|| AuthError::SessionExpired("no refresh token stored".to_string()))?;

        let request = ApiRequest::post("/auth/refresh")
            .json_body(&RefreshRequest { refresh_token: &refresh_token })
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let pair: TokenPair = self.client.call(&request).await.map_err(|e| {
            if e.is_transport_failure() {
                AuthError::Transport(e.to_string())
            } else {
                AuthError::SessionExpired(e.message().to_string())
            }
        })?;

        tracing::debug!("received rotated session tokens");
        Ok(pair)
    }

    async fn get_profile(&self, access_token: &str) -> std::result::Result<UserProfile, ApiError> {
        let request = ApiRequest::get("/user/me").bearer(access_token);
        self.client.call_with_retry(&request).await
    }

    async fn profile_with(&self, pair: TokenPair) -> Result<CurrentProfile> {
        let profile = self
            .get_profile(&pair.access_token)
            .await
            .map_err(AuthError::from_session_failure)?;
        Ok(CurrentProfile::rotated(profile, pair))
    }

    async fn request_tokens(&self, request: ApiRequest) -> Result<TokenPair> {
        self.client
            .call(&request)
            .await
            .map_err(AuthError::from_credential_failure)
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn exchange_credentials(&self, email: &str, password: &str) -> Result<TokenPair> {
        let request = ApiRequest::post("/auth/login")
            .json_body(&LoginRequest { email, password })
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        self.request_tokens(request).await
    }

    async fn create_account(&self, account: &NewAccount) -> Result<TokenPair> {
        let request = ApiRequest::post("/auth/register")
            .json_body(account)
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        self.request_tokens(request).await
    }

    async fn fetch_current_profile(&self) -> Result<CurrentProfile> {
        let access_token = self
            .tokens
            .access_token()?
            .ok_or_else(|| AuthError::SessionExpired("no access token stored".to_string()))?;
        let can_refresh = self.tokens.refresh_token()?.is_some();

        let leeway = Duration::seconds(REFRESH_LEEWAY_SECS);
        if can_refresh && tokens::is_token_expiring_soon(&access_token, leeway) {
            tracing::debug!("access token expiring, refreshing before profile fetch");
            let pair = self.refresh_tokens().await?;
            return self.profile_with(pair).await;
        }

        match self.get_profile(&access_token).await {
            Ok(profile) => Ok(CurrentProfile::new(profile)),
            Err(err) if err.status() == 401 && can_refresh => {
                tracing::debug!("profile fetch rejected, attempting token refresh");
                let pair = self.refresh_tokens().await?;
                self.profile_with(pair).await
            }
            Err(err) => Err(AuthError::from_session_failure(err)),
        }
    }

    fn invalidate_session(&self) {
        let access_token = self.tokens.access_token().ok().flatten();

        if let Err(e) = self.tokens.clear() {
            tracing::warn!("failed to clear stored tokens: {}", e);
        }

        let (Some(path), Some(token)) = (self.logout_path.clone(), access_token) else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime available, skipping server-side logout");
            return;
        };

        let client = self.client.clone();
        runtime.spawn(async move {
            let request = ApiRequest::post(path).bearer(&token);
            if let Err(e) = client.call_no_content(&request).await {
                tracing::warn!("server-side logout failed: {}", e);
            }
        });
    }
}

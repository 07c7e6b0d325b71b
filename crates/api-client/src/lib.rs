//! Hosting backend API client
//!
//! This crate provides the REST transport for the VM hosting backend, the
//! authentication boundary used by the session store, durable bearer-token
//! storage and the account types exchanged with the server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod http;
pub mod profile;
pub mod tokens;

pub use auth::{AuthApi, AuthError, CurrentProfile, HttpAuthApi};
pub use http::{ApiClient, ApiClientConfig, ApiError, ApiRequest, RetryConfig};
pub use profile::{NewAccount, TokenPair, UserProfile, UserRole, UserStatus};
pub use tokens::{TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};

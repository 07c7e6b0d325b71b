//! Durable bearer-token storage and JWT inspection
//!
//! Tokens never live in the in-memory session record. They are kept in the
//! durable store under their own keys so they survive restarts without ever
//! passing through generic state serialization.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{DurableStore, KvError};

use crate::profile::TokenPair;

/// Durable key holding the access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Durable key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Typed access to the two token keys of a durable store
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn DurableStore>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Wrap a durable store
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// The stored access token, if any
    pub fn access_token(&self) -> Result<Option<String>, KvError> {
        self.store.read(ACCESS_TOKEN_KEY)
    }

    /// The stored refresh token, if any
    pub fn refresh_token(&self) -> Result<Option<String>, KvError> {
        self.store.read(REFRESH_TOKEN_KEY)
    }

    /// Whether an access token is stored
    pub fn has_access_token(&self) -> Result<bool, KvError> {
        Ok(self.access_token()?.is_some())
    }

    /// Persist both tokens of a pair
    pub fn save(&self, pair: &TokenPair) -> Result<(), KvError> {
        self.store.write(ACCESS_TOKEN_KEY, &pair.access_token)?;
        self.store.write(REFRESH_TOKEN_KEY, &pair.refresh_token)
    }

    /// Delete both tokens
    ///
    /// Both deletes are attempted even if the first fails.
    pub fn clear(&self) -> Result<(), KvError> {
        let access = self.store.delete(ACCESS_TOKEN_KEY);
        let refresh = self.store.delete(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// JWT claims issued by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (account id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Expiration timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Token kind, "access" or "refresh"
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Parse JWT claims without validation
///
/// The signature is not checked; the result is only used to decide whether
/// a refresh is worth attempting before the server rejects the token.
pub fn parse_jwt_claims(token: &str) -> Result<JwtClaims, jsonwebtoken::errors::Error> {
    let header = decode_header(token)?;

    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let token_data = decode::<JwtClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;

    Ok(token_data.claims)
}

/// Expiration time of a JWT, if it is a JWT and carries one
pub fn token_expiration(token: &str) -> Option<DateTime<Utc>> {
    let claims = parse_jwt_claims(token).ok()?;
    claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}

/// Check if a token is expired or expires within `threshold`
///
/// Opaque tokens and JWTs without an `exp` claim are never considered
/// expiring locally; the server decides for those.
pub fn is_token_expiring_soon(token: &str, threshold: Duration) -> bool {
    token_expiration(token).is_some_and(|exp| exp <= Utc::now() + threshold)
}

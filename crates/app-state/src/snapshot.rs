//! Persisted projection of the session
//!
//! Only `{user, is_authenticated}` survives a restart. The loading flag is
//! transient and tokens have their own keys.

use api_client::UserProfile;
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Durable key of the session snapshot
pub const SNAPSHOT_KEY: &str = "auth-storage";

/// Current snapshot schema version
pub const SNAPSHOT_VERSION: u32 = 1;

/// The part of a [`Session`] that is written to durable storage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Profile of the signed-in account
    pub user: Option<UserProfile>,
    /// Whether the session was authenticated when written
    pub is_authenticated: bool,
}

impl SessionSnapshot {
    /// Whether the snapshot upholds "authenticated implies a profile"
    pub fn is_consistent(&self) -> bool {
        !self.is_authenticated || self.user.is_some()
    }

    /// Rebuild a settled session from the snapshot
    pub fn into_session(self) -> Session {
        Session { user: self.user, is_authenticated: self.is_authenticated, is_loading: false }
    }
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self { user: session.user.clone(), is_authenticated: session.is_authenticated }
    }
}

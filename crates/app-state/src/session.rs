//! Session record, status and events
//!
//! [`Session`] is the in-memory authentication state observed by the rest of
//! the console. It is only ever changed by [`SessionStore`](crate::SessionStore)
//! operations; everything else reads copies of it.

use api_client::{AuthError, UserProfile};
use storage::KvError;

/// In-memory authentication state
///
/// Bearer tokens are deliberately absent; they live in the durable store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Session {
    /// Profile of the signed-in account
    pub user: Option<UserProfile>,
    /// Whether `user` was fetched with a token the backend accepted
    pub is_authenticated: bool,
    /// Whether a login, registration or profile fetch is in flight
    pub is_loading: bool,
}

impl Session {
    /// The signed-out state
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated, settled session for `user`
    pub fn authenticated(user: UserProfile) -> Self {
        Self { user: Some(user), is_authenticated: true, is_loading: false }
    }

    /// Coarse state of the session
    pub fn status(&self) -> SessionStatus {
        if self.is_loading {
            SessionStatus::Authenticating
        } else if self.is_authenticated {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        }
    }

    /// Whether the authenticated flag is backed by a profile
    pub fn is_consistent(&self) -> bool {
        !self.is_authenticated || self.user.is_some()
    }

    /// Whether the signed-in account is an administrator
    pub fn is_admin(&self) -> bool {
        self.is_authenticated && self.user.as_ref().is_some_and(UserProfile::is_admin)
    }
}

/// Coarse session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    /// Not authenticated, nothing in flight
    Anonymous,
    /// An operation is in flight
    Authenticating,
    /// Authenticated, nothing in flight
    Authenticated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Anonymous => "anonymous",
            SessionStatus::Authenticating => "authenticating",
            SessionStatus::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// Store operations that occupy the in-flight slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Credential login
    Login,
    /// Account registration
    Register,
    /// Profile reconciliation
    FetchUser,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Login => "login",
            Operation::Register => "register",
            Operation::FetchUser => "fetch_user",
        };
        f.write_str(name)
    }
}

/// Events broadcast when the session changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Login completed
    LoggedIn(UserProfile),
    /// Registration completed
    Registered(UserProfile),
    /// A stored token was verified and the profile loaded
    Restored(UserProfile),
    /// The user logged out
    LoggedOut,
    /// A stored token was rejected or missing; the session was reset
    Expired,
    /// The profile was replaced locally
    ProfileUpdated(UserProfile),
}

/// Errors returned by session store operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The authentication backend rejected or failed the request
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Durable storage failed
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),

    /// Another operation is already pending
    #[error("{0} already in progress")]
    OperationInFlight(Operation),

    /// A logout happened while the operation was pending
    #[error("Operation superseded by logout")]
    Superseded,
}

impl SessionError {
    /// The authentication error, if that is what this is
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            SessionError::Auth(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type for session store operations
pub type Result<T> = std::result::Result<T, SessionError>;

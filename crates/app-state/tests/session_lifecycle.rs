//! Session store sequencing and persistence tests
//!
//! These drive the store with a scripted backend whose credential exchange
//! can be held open, so logout and concurrent operations can be interleaved
//! with a pending sign-in deterministically.

use api_client::auth::Result as AuthResult;
use api_client::{
    AuthApi, AuthError, CurrentProfile, NewAccount, TokenPair, TokenStore, UserProfile,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use app_state::{Operation, Session, SessionError, SessionStatus, SessionStore, SNAPSHOT_KEY};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{DurableStore, KvConfig, KvStore, MemoryStore};
use tempfile::TempDir;
use tokio::sync::Semaphore;

fn profile() -> UserProfile {
    serde_json::from_value(serde_json::json!({
        "id": 1,
        "email": "a@b.com",
        "first_name": "Alice",
        "last_name": "Admin",
        "role": "admin",
        "balance": "10.00"
    }))
    .unwrap()
}

/// Backend double whose credential exchange waits for a permit
struct ScriptedApi {
    tokens: TokenStore,
    permits: Semaphore,
    exchanges: AtomicUsize,
    profile_fetches: AtomicUsize,
    /// When set, profile fetches wait here and then report rotated tokens
    refresh_permits: Option<Semaphore>,
}

impl ScriptedApi {
    /// Exchanges block until [`release`](Self::release) is called
    fn gated(store: Arc<dyn DurableStore>) -> Self {
        Self::with_permits(store, 0)
    }

    /// Exchanges complete immediately
    fn open(store: Arc<dyn DurableStore>) -> Self {
        Self::with_permits(store, Semaphore::MAX_PERMITS)
    }

    fn with_permits(store: Arc<dyn DurableStore>, permits: usize) -> Self {
        Self {
            tokens: TokenStore::new(store),
            permits: Semaphore::new(permits),
            exchanges: AtomicUsize::new(0),
            profile_fetches: AtomicUsize::new(0),
            refresh_permits: None,
        }
    }

    /// Profile fetches refresh the tokens and block until
    /// [`release_refresh`](Self::release_refresh) is called
    fn refreshing(store: Arc<dyn DurableStore>) -> Self {
        Self { refresh_permits: Some(Semaphore::new(0)), ..Self::open(store) }
    }

    fn release(&self) {
        self.permits.add_permits(1);
    }

    fn release_refresh(&self) {
        if let Some(permits) = &self.refresh_permits {
            permits.add_permits(1);
        }
    }

    fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    async fn issue_tokens(&self) -> AuthResult<TokenPair> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.permits
            .acquire()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?
            .forget();
        Ok(TokenPair::new("T1", "R1"))
    }
}

#[async_trait]
impl AuthApi for ScriptedApi {
    async fn exchange_credentials(&self, _email: &str, _password: &str) -> AuthResult<TokenPair> {
        self.issue_tokens().await
    }

    async fn create_account(&self, _account: &NewAccount) -> AuthResult<TokenPair> {
        self.issue_tokens().await
    }

    async fn fetch_current_profile(&self) -> AuthResult<CurrentProfile> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        if self.tokens.access_token()?.is_none() {
            return Err(AuthError::SessionExpired("no access token stored".to_string()));
        }

        let Some(permits) = &self.refresh_permits else {
            return Ok(CurrentProfile::new(profile()));
        };
        permits
            .acquire()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?
            .forget();
        Ok(CurrentProfile::rotated(profile(), TokenPair::new("NEW", "R2")))
    }

    fn invalidate_session(&self) {
        let _ = self.tokens.clear();
    }
}

async fn wait_until_loading(sessions: &SessionStore) {
    let mut rx = sessions.subscribe();
    rx.wait_for(|session| session.is_loading).await.unwrap();
}

#[tokio::test]
async fn test_logout_supersedes_pending_login() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::gated(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.login("a@b.com", "pw").await }
    });

    wait_until_loading(&sessions).await;
    sessions.logout();
    api.release();

    let result = pending.await.unwrap();

    assert!(matches!(result, Err(SessionError::Superseded)));
    assert_eq!(sessions.session(), Session::anonymous());
    assert!(!store.contains(ACCESS_TOKEN_KEY));
    assert!(!store.contains(REFRESH_TOKEN_KEY));
    assert_eq!(api.profile_fetches(), 0);
}

#[tokio::test]
async fn test_logout_supersedes_refreshing_fetch_user() {
    let store = Arc::new(MemoryStore::with_entries([
        (ACCESS_TOKEN_KEY, "OLD"),
        (REFRESH_TOKEN_KEY, "R1"),
    ]));
    let api = Arc::new(ScriptedApi::refreshing(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.fetch_user().await }
    });

    wait_until_loading(&sessions).await;
    sessions.logout();
    api.release_refresh();

    assert_eq!(pending.await.unwrap(), SessionStatus::Anonymous);
    assert_eq!(sessions.session(), Session::anonymous());

    // The late refresh result was dropped with the rest of the operation
    assert!(!store.contains(ACCESS_TOKEN_KEY));
    assert!(!store.contains(REFRESH_TOKEN_KEY));
    assert!(!sessions.needs_reconciliation());

    assert_eq!(sessions.ensure_session().await, SessionStatus::Anonymous);
    assert_eq!(api.profile_fetches(), 1);
}

#[tokio::test]
async fn test_rotated_tokens_stored_by_fetch_user() {
    let store = Arc::new(MemoryStore::with_entries([
        (ACCESS_TOKEN_KEY, "OLD"),
        (REFRESH_TOKEN_KEY, "R1"),
    ]));
    let api = Arc::new(ScriptedApi::refreshing(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    api.release_refresh();
    assert_eq!(sessions.fetch_user().await, SessionStatus::Authenticated);

    assert_eq!(store.read(ACCESS_TOKEN_KEY).unwrap(), Some("NEW".to_string()));
    assert_eq!(store.read(REFRESH_TOKEN_KEY).unwrap(), Some("R2".to_string()));
}

#[tokio::test]
async fn test_login_after_superseded_login_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::gated(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.login("a@b.com", "pw").await }
    });
    wait_until_loading(&sessions).await;
    sessions.logout();
    api.release();
    assert!(pending.await.unwrap().is_err());

    api.release();
    let user = sessions.login("a@b.com", "pw").await.unwrap();

    assert_eq!(user.id, 1);
    assert_eq!(sessions.status(), SessionStatus::Authenticated);
    assert!(store.contains(ACCESS_TOKEN_KEY));
}

#[tokio::test]
async fn test_concurrent_login_rejected() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::gated(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.login("a@b.com", "pw").await }
    });
    wait_until_loading(&sessions).await;

    let second = sessions.login("a@b.com", "pw").await;
    assert!(matches!(second, Err(SessionError::OperationInFlight(Operation::Login))));

    let account = NewAccount::new("b@b.com", "pw", "Bob", "B");
    let third = sessions.register(&account).await;
    assert!(matches!(third, Err(SessionError::OperationInFlight(Operation::Login))));

    // The rejected calls did not disturb the pending one
    assert_eq!(sessions.status(), SessionStatus::Authenticating);
    assert_eq!(api.exchanges(), 1);

    api.release();
    pending.await.unwrap().unwrap();
    assert_eq!(sessions.status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_fetch_user_while_pending_is_noop() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::gated(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.login("a@b.com", "pw").await }
    });
    wait_until_loading(&sessions).await;

    assert_eq!(sessions.fetch_user().await, SessionStatus::Authenticating);
    assert!(!sessions.needs_reconciliation());
    assert_eq!(api.profile_fetches(), 0);

    api.release();
    pending.await.unwrap().unwrap();
    assert_eq!(api.profile_fetches(), 1);
}

#[tokio::test]
async fn test_cancelled_login_clears_loading() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::gated(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());

    let pending = tokio::spawn({
        let sessions = sessions.clone();
        async move { sessions.login("a@b.com", "pw").await }
    });
    wait_until_loading(&sessions).await;

    pending.abort();
    assert!(pending.await.unwrap_err().is_cancelled());

    let session = sessions.session();
    assert!(!session.is_loading);
    assert!(!session.is_authenticated);

    // The slot was released
    api.release();
    sessions.login("a@b.com", "pw").await.unwrap();
    assert_eq!(sessions.status(), SessionStatus::Authenticated);
}

#[tokio::test]
async fn test_loading_cleared_after_every_settlement() {
    let store = Arc::new(MemoryStore::new());
    let api = Arc::new(ScriptedApi::open(store.clone()));
    let sessions = SessionStore::new(api.clone(), store.clone());
    assert!(!sessions.session().is_loading);

    sessions.login("a@b.com", "pw").await.unwrap();
    assert!(!sessions.session().is_loading);

    sessions.fetch_user().await;
    assert!(!sessions.session().is_loading);

    sessions.logout();
    assert!(!sessions.session().is_loading);

    sessions.fetch_user().await;
    assert!(!sessions.session().is_loading);
    assert!(sessions.session().is_consistent());
}

#[tokio::test]
async fn test_session_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.db").to_string_lossy().to_string();

    {
        let store: Arc<dyn DurableStore> =
            Arc::new(KvStore::new(KvConfig::new(path.clone())).unwrap());
        let api = Arc::new(ScriptedApi::open(store.clone()));
        let sessions = SessionStore::new(api, store);

        sessions.login("a@b.com", "pw").await.unwrap();
    }

    let store: Arc<dyn DurableStore> = Arc::new(KvStore::new(KvConfig::new(path)).unwrap());
    let api = Arc::new(ScriptedApi::open(store.clone()));
    let sessions = SessionStore::rehydrate(api.clone(), store.clone());

    let restored = sessions.session();
    assert!(restored.is_authenticated);
    assert_eq!(restored.user, Some(profile()));
    assert!(sessions.needs_reconciliation());

    assert_eq!(sessions.ensure_session().await, SessionStatus::Authenticated);
    assert_eq!(api.profile_fetches(), 1);
    assert!(!sessions.needs_reconciliation());
    assert!(store.read(SNAPSHOT_KEY).unwrap().is_some());
}

#[tokio::test]
async fn test_corrupted_snapshot_discarded_after_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.db").to_string_lossy().to_string();

    {
        let store: Arc<dyn DurableStore> =
            Arc::new(KvStore::new(KvConfig::new(path.clone())).unwrap());
        let api = Arc::new(ScriptedApi::open(store.clone()));
        let sessions = SessionStore::new(api, store.clone());
        sessions.login("a@b.com", "pw").await.unwrap();

        let raw = store.read(SNAPSHOT_KEY).unwrap().unwrap();
        store.write(SNAPSHOT_KEY, &raw.replace("10.00", "99.99")).unwrap();
    }

    let store: Arc<dyn DurableStore> = Arc::new(KvStore::new(KvConfig::new(path)).unwrap());
    let api = Arc::new(ScriptedApi::open(store.clone()));
    let sessions = SessionStore::rehydrate(api, store.clone());

    assert_eq!(sessions.session(), Session::anonymous());
    assert!(store.read(SNAPSHOT_KEY).unwrap().is_none());
    // Tokens are untouched; the next reconciliation decides
    assert!(sessions.needs_reconciliation());
}

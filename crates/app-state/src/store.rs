//! The session store
//!
//! [`SessionStore`] owns the one [`Session`] of a console instance. State is
//! published through a `watch` channel so readers always see the latest
//! record, and discrete changes are broadcast as [`SessionEvent`]s.
//!
//! Operations share a single in-flight slot. Logout always wins: it bumps the
//! store's epoch, and an operation started in an older epoch may not commit
//! anything once it resumes.
//!
//! # Example
//!
//! ```no_run
//! use api_client::{ApiClient, ApiClientConfig, HttpAuthApi, TokenStore};
//! use app_state::SessionStore;
//! use std::sync::Arc;
//! use storage::{DurableStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
//!     let client = ApiClient::new(ApiClientConfig::new("http://localhost:8000"))?;
//!     let api = Arc::new(HttpAuthApi::new(client, TokenStore::new(store.clone())));
//!
//!     let sessions = SessionStore::rehydrate(api, store);
//!     sessions.ensure_session().await;
//!
//!     let user = sessions.login("alice@example.com", "password").await?;
//!     println!("Balance: {}", user.balance);
//!
//!     sessions.logout();
//!     Ok(())
//! }
//! ```

use api_client::auth::Result as AuthResult;
use api_client::{AuthApi, CurrentProfile, NewAccount, TokenPair, TokenStore, UserProfile};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use storage::{DurableStore, SnapshotSlot};
use tokio::sync::{broadcast, watch};

use crate::session::{Operation, Result, Session, SessionError, SessionEvent, SessionStatus};
use crate::snapshot::{SessionSnapshot, SNAPSHOT_KEY, SNAPSHOT_VERSION};

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 16;

/// Claim on the in-flight slot
#[derive(Debug, Clone, Copy)]
struct Ticket {
    id: u64,
    epoch: u64,
    operation: Operation,
}

/// Sequencing state guarded by the commit lock
#[derive(Debug, Default)]
struct Ledger {
    /// Bumped by every logout
    epoch: u64,
    next_id: u64,
    active: Option<Ticket>,
    /// Whether the current session was confirmed by the backend in this process
    verified: bool,
}

struct Inner {
    api: Arc<dyn AuthApi>,
    tokens: TokenStore,
    snapshot: SnapshotSlot<SessionSnapshot>,
    ledger: Mutex<Ledger>,
    state_tx: watch::Sender<Session>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn current(&self) -> Session {
        self.state_tx.borrow().clone()
    }

    /// Release the slot and publish the settled state
    fn settle(&self, ledger: &mut Ledger, next: Session) {
        ledger.active = None;
        self.publish(next);
    }

    /// Publish `next`, persisting the projection if it changed
    fn publish(&self, next: Session) {
        let snapshot = SessionSnapshot::from(&next);
        let mut persist = false;

        self.state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            persist = SessionSnapshot::from(&*current) != snapshot;
            *current = next;
            true
        });

        if persist {
            if let Err(e) = self.snapshot.save(&snapshot) {
                tracing::warn!(
                    key = self.snapshot.key(),
                    "failed to persist session snapshot: {}",
                    e
                );
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn stored_access_token(&self) -> Option<String> {
        match self.tokens.access_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("failed to read stored access token: {}", e);
                None
            }
        }
    }

    /// Store tokens rotated while fetching the profile
    fn save_rotated(&self, current: &CurrentProfile) -> Result<()> {
        if let Some(pair) = &current.rotated {
            self.tokens.save(pair)?;
            tracing::debug!("stored rotated session tokens");
        }
        Ok(())
    }

    fn purge_tokens(&self) {
        if let Err(e) = self.tokens.clear() {
            tracing::warn!("failed to delete stored tokens: {}", e);
        }
    }
}

/// Holds the in-flight slot for one operation
///
/// Dropping it before the operation settled (for example when the caller's
/// future is cancelled) frees the slot and clears the loading flag.
struct OperationGuard<'a> {
    inner: &'a Inner,
    ticket: Ticket,
}

impl OperationGuard<'_> {
    /// Run `f` under the commit lock unless a logout superseded this operation
    fn commit<T>(&self, f: impl FnOnce(&Inner, &mut Ledger) -> Result<T>) -> Result<T> {
        let mut ledger = self.inner.ledger.lock();
        if ledger.epoch != self.ticket.epoch {
            tracing::debug!(
                operation = %self.ticket.operation,
                "discarding result of superseded operation"
            );
            return Err(SessionError::Superseded);
        }
        f(self.inner, &mut ledger)
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut ledger = self.inner.ledger.lock();
        if ledger.active.is_some_and(|active| active.id == self.ticket.id) {
            tracing::debug!(
                operation = %self.ticket.operation,
                "operation abandoned before settling"
            );
            ledger.active = None;
            self.inner.state_tx.send_if_modified(|session| {
                std::mem::replace(&mut session.is_loading, false)
            });
        }
    }
}

/// Owner of the console's authentication state
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session", &*self.inner.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a signed-out store without reading any persisted snapshot
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn DurableStore>) -> Self {
        let snapshot = SnapshotSlot::new(store.clone(), SNAPSHOT_KEY, SNAPSHOT_VERSION);
        Self::from_parts(api, TokenStore::new(store), snapshot, Session::anonymous())
    }

    /// Create a store starting from the persisted snapshot
    ///
    /// A snapshot that is unreadable, fails its checksum, claims
    /// authentication without a profile, or claims authentication while no
    /// access token is stored is discarded and the store starts signed out.
    /// A restored session is not trusted until [`fetch_user`](Self::fetch_user)
    /// confirms it.
    pub fn rehydrate(api: Arc<dyn AuthApi>, store: Arc<dyn DurableStore>) -> Self {
        let snapshot = SnapshotSlot::new(store.clone(), SNAPSHOT_KEY, SNAPSHOT_VERSION);
        let tokens = TokenStore::new(store);
        let initial = restore_session(&snapshot, &tokens);
        Self::from_parts(api, tokens, snapshot, initial)
    }

    fn from_parts(
        api: Arc<dyn AuthApi>,
        tokens: TokenStore,
        snapshot: SnapshotSlot<SessionSnapshot>,
        initial: Session,
    ) -> Self {
        let (state_tx, _) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                api,
                tokens,
                snapshot,
                ledger: Mutex::new(Ledger::default()),
                state_tx,
                events_tx,
            }),
        }
    }

    /// Copy of the current session
    pub fn session(&self) -> Session {
        self.inner.current()
    }

    /// Coarse state of the current session
    pub fn status(&self) -> SessionStatus {
        self.inner.state_tx.borrow().status()
    }

    /// Profile of the signed-in account, if any
    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state_tx.borrow().user.clone()
    }

    /// Whether the session is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.inner.state_tx.borrow().is_authenticated
    }

    /// Watch the session; the receiver always holds the latest state
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state_tx.subscribe()
    }

    /// Receive session events from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Log in with email and password
    ///
    /// On success both tokens are stored and the session is authenticated.
    /// Any failure leaves the session signed out and is returned as is.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        let guard = self.begin(Operation::Login)?;
        tracing::info!("logging in");

        let exchange = self.inner.api.exchange_credentials(email, password);
        self.authenticate(guard, exchange, SessionEvent::LoggedIn).await
    }

    /// Create an account and sign into it
    pub async fn register(&self, account: &NewAccount) -> Result<UserProfile> {
        let guard = self.begin(Operation::Register)?;
        tracing::info!("registering account");

        let exchange = self.inner.api.create_account(account);
        self.authenticate(guard, exchange, SessionEvent::Registered).await
    }

    /// Sign out
    ///
    /// Never fails and never waits on the network. Any pending operation is
    /// superseded and will not commit.
    pub fn logout(&self) {
        let mut ledger = self.inner.ledger.lock();
        ledger.epoch += 1;
        ledger.verified = false;
        if let Some(active) = ledger.active {
            tracing::debug!(operation = %active.operation, "logout supersedes pending operation");
        }

        self.inner.api.invalidate_session();
        self.inner.settle(&mut ledger, Session::anonymous());
        self.inner.emit(SessionEvent::LoggedOut);

        tracing::info!("logged out");
    }

    /// Reconcile the session with the stored access token
    ///
    /// Without a stored token the session is reset with no network call.
    /// Otherwise the profile is fetched; if that fails for any reason the
    /// session is reset and both tokens are deleted. If another operation is
    /// pending this does nothing. Returns the resulting status.
    pub async fn fetch_user(&self) -> SessionStatus {
        let guard = {
            let mut ledger = self.inner.ledger.lock();

            if let Some(active) = ledger.active {
                tracing::debug!(
                    operation = %active.operation,
                    "skipping fetch_user, operation pending"
                );
                return self.status();
            }

            if self.inner.stored_access_token().is_none() {
                let was_authenticated = self.inner.current().is_authenticated;
                ledger.verified = false;
                self.inner.settle(&mut ledger, Session::anonymous());
                if was_authenticated {
                    tracing::info!("no stored token, session reset");
                    self.inner.emit(SessionEvent::Expired);
                }
                return SessionStatus::Anonymous;
            }

            self.start(&mut ledger, Operation::FetchUser)
        };

        let fetched = self.inner.api.fetch_current_profile().await;

        let committed = guard.commit(|inner, ledger| {
            let fetched = fetched.map_err(SessionError::from).and_then(|current| {
                inner.save_rotated(&current)?;
                Ok(current.profile)
            });

            match fetched {
                Ok(profile) => {
                    let restored = !ledger.verified;
                    ledger.verified = true;
                    inner.settle(ledger, Session::authenticated(profile.clone()));
                    if restored {
                        tracing::info!(user_id = profile.id, "session restored");
                        inner.emit(SessionEvent::Restored(profile));
                    }
                }
                Err(e) => {
                    tracing::warn!("stored session not accepted, signing out: {}", e);
                    inner.purge_tokens();
                    ledger.verified = false;
                    inner.settle(ledger, Session::anonymous());
                    inner.emit(SessionEvent::Expired);
                }
            }
            Ok(())
        });

        if committed.is_err() {
            tracing::debug!("fetch_user result discarded after logout");
        }

        self.status()
    }

    /// Replace the profile without touching the authentication flags
    pub fn update_user(&self, user: UserProfile) {
        let _ledger = self.inner.ledger.lock();
        let next = Session { user: Some(user.clone()), ..self.inner.current() };
        self.inner.publish(next);
        self.inner.emit(SessionEvent::ProfileUpdated(user));
    }

    /// Whether a stored token still has to be checked against the backend
    ///
    /// True when an access token is stored, nothing is pending, and the
    /// session has not been confirmed in this process.
    pub fn needs_reconciliation(&self) -> bool {
        let ledger = self.inner.ledger.lock();
        ledger.active.is_none() && !ledger.verified && self.inner.stored_access_token().is_some()
    }

    /// Run [`fetch_user`](Self::fetch_user) if the session needs reconciling
    pub async fn ensure_session(&self) -> SessionStatus {
        if self.needs_reconciliation() {
            self.fetch_user().await
        } else {
            self.status()
        }
    }

    fn begin(&self, operation: Operation) -> Result<OperationGuard<'_>> {
        let mut ledger = self.inner.ledger.lock();
        if let Some(active) = ledger.active {
            tracing::debug!(
                requested = %operation,
                pending = %active.operation,
                "operation rejected"
            );
            return Err(SessionError::OperationInFlight(active.operation));
        }
        Ok(self.start(&mut ledger, operation))
    }

    fn start(&self, ledger: &mut Ledger, operation: Operation) -> OperationGuard<'_> {
        ledger.next_id += 1;
        let ticket = Ticket { id: ledger.next_id, epoch: ledger.epoch, operation };
        ledger.active = Some(ticket);

        self.inner.state_tx.send_modify(|session| session.is_loading = true);
        tracing::debug!(%operation, "operation started");

        OperationGuard { inner: &self.inner, ticket }
    }

    async fn authenticate<F>(
        &self,
        guard: OperationGuard<'_>,
        exchange: F,
        event: fn(UserProfile) -> SessionEvent,
    ) -> Result<UserProfile>
    where
        F: Future<Output = AuthResult<TokenPair>>,
    {
        let fetched = self.exchange_and_fetch(&guard, exchange).await;
        let committed = guard.commit(|inner, ledger| {
            let profile = fetched.and_then(|current| {
                inner.save_rotated(&current)?;
                Ok(current.profile)
            });
            match profile {
                Ok(profile) => {
                    ledger.verified = true;
                    inner.settle(ledger, Session::authenticated(profile.clone()));
                    tracing::info!(
                        user_id = profile.id,
                        operation = %guard.ticket.operation,
                        "signed in"
                    );
                    inner.emit(event(profile.clone()));
                    Ok(Ok(profile))
                }
                Err(SessionError::Superseded) => Err(SessionError::Superseded),
                Err(err) => {
                    tracing::warn!(operation = %guard.ticket.operation, "sign-in failed: {}", err);
                    inner.purge_tokens();
                    ledger.verified = false;
                    inner.settle(ledger, Session::anonymous());
                    Ok(Err(err))
                }
            }
        });
        committed?
    }

    async fn exchange_and_fetch<F>(
        &self,
        guard: &OperationGuard<'_>,
        exchange: F,
    ) -> Result<CurrentProfile>
    where
        F: Future<Output = AuthResult<TokenPair>>,
    {
        let pair = exchange.await?;
        guard.commit(|inner, _| inner.tokens.save(&pair).map_err(SessionError::from))?;
        Ok(self.inner.api.fetch_current_profile().await?)
    }
}

fn restore_session(slot: &SnapshotSlot<SessionSnapshot>, tokens: &TokenStore) -> Session {
    let snapshot = match slot.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Session::anonymous(),
        Err(e) => {
            tracing::warn!(key = slot.key(), "discarding unreadable session snapshot: {}", e);
            discard(slot);
            return Session::anonymous();
        }
    };

    if !snapshot.is_consistent() {
        tracing::warn!(
            key = slot.key(),
            "discarding session snapshot marked authenticated without a profile"
        );
        discard(slot);
        return Session::anonymous();
    }

    if snapshot.is_authenticated {
        let has_token = tokens.has_access_token().unwrap_or_else(|e| {
            tracing::warn!("failed to read stored access token: {}", e);
            false
        });
        if !has_token {
            tracing::warn!(
                key = slot.key(),
                "discarding authenticated session snapshot with no stored token"
            );
            discard(slot);
            return Session::anonymous();
        }
    }

    tracing::debug!(authenticated = snapshot.is_authenticated, "session snapshot restored");
    snapshot.into_session()
}

fn discard(slot: &SnapshotSlot<SessionSnapshot>) {
    if let Err(e) = slot.clear() {
        tracing::warn!(key = slot.key(), "failed to remove session snapshot: {}", e);
    }
}

//! Composition root
//!
//! [`Console`] wires the configured durable store, the HTTP auth client and
//! the session store together, and answers the questions the dashboard shell
//! asks on every render.

use anyhow::{Context, Result};
use api_client::{ApiClient, HttpAuthApi, TokenStore};
use app_state::{visible_nav_items, AccessGate, NavItem, SessionStatus, SessionStore};
use std::sync::Arc;
use storage::{DurableStore, KvStore, MemoryStore};

use crate::config::ConsoleConfig;

/// A wired console instance
#[derive(Clone)]
pub struct Console {
    config: ConsoleConfig,
    store: Arc<dyn DurableStore>,
    sessions: SessionStore,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl Console {
    /// Open the durable store, build the HTTP client and rehydrate the session
    pub fn open(config: ConsoleConfig) -> Result<Self> {
        let store: Arc<dyn DurableStore> = match config.kv_config() {
            Some(kv_config) => {
                let path = kv_config.path.clone();
                let kv = KvStore::new(kv_config)
                    .with_context(|| format!("failed to open session store at {path}"))?;
                Arc::new(kv)
            }
            None => {
                tracing::debug!("no data directory configured, keeping session in memory");
                Arc::new(MemoryStore::new())
            }
        };

        let client =
            ApiClient::new(config.api_client_config()).context("failed to build HTTP client")?;
        let mut api = HttpAuthApi::new(client, TokenStore::new(store.clone()));
        if let Some(path) = &config.logout_path {
            api = api.with_logout_path(path.clone());
        }

        let sessions = SessionStore::rehydrate(Arc::new(api), store.clone());
        tracing::info!(api_url = %config.api_url, status = %sessions.status(), "console ready");

        Ok(Self { config, store, sessions })
    }

    /// Open with configuration from the environment
    pub fn from_env() -> Result<Self> {
        Self::open(ConsoleConfig::from_env()?)
    }

    /// The session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The durable store backing tokens and the session snapshot
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    /// Reconcile a stored token once per process, as the dashboard does on mount
    pub async fn mount(&self) -> AccessGate {
        let status = self.sessions.ensure_session().await;
        tracing::debug!(%status, "dashboard mounted");
        self.gate()
    }

    /// What the dashboard shell should show right now
    pub fn gate(&self) -> AccessGate {
        AccessGate::evaluate(&self.sessions.session())
    }

    /// Sidebar entries for the signed-in user
    pub fn nav_items(&self) -> Vec<&'static NavItem> {
        let session = self.sessions.session();
        if session.status() == SessionStatus::Authenticated {
            visible_nav_items(session.user.as_ref())
        } else {
            visible_nav_items(None)
        }
    }
}

//! Wallet provider session
//!
//! Owns the connection to the signing environment. A [`Session`] is created by
//! [`ProviderSession::connect`] and invalidated whenever the provider reports an
//! account or network change. Every session carries the generation it was
//! created under so in-flight work can detect that it went stale.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::types::{Address, ChainId};
use crate::{Error, Result};

/// Unsolicited notifications from the signing environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Active account list changed; first entry is the new active account
    AccountsChanged(Vec<Address>),

    /// Wallet switched networks
    ChainChanged(ChainId),
}

/// Signer boundary: the injected account provider
#[async_trait]
pub trait SignerBackend: Send + Sync {
    /// Ask the user for account access
    ///
    /// Returns the account list (first entry active) or
    /// [`Error::UserRejected`] if the user declined.
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// Network the wallet is currently on
    async fn chain_id(&self) -> Result<ChainId>;

    /// Subscribe to account/network change notifications
    fn subscribe(&self) -> broadcast::Receiver<ProviderEvent>;
}

/// A connected account on a specific network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account: Address,
    pub chain_id: ChainId,
    generation: u64,
}

impl Session {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Provider session
///
/// Constructed explicitly and shared by handle; there is no process-wide
/// instance. `backend` is `None` when no signing environment is installed.
pub struct ProviderSession {
    backend: Option<Arc<dyn SignerBackend>>,
    current: watch::Sender<Option<Session>>,
    generation: AtomicU64,
    listening: AtomicBool,
}

impl ProviderSession {
    pub fn new(backend: Option<Arc<dyn SignerBackend>>) -> Arc<Self> {
        let (current, _) = watch::channel(None);
        Arc::new(Self {
            backend,
            current,
            generation: AtomicU64::new(0),
            listening: AtomicBool::new(false),
        })
    }

    /// Session over an installed signing environment
    pub fn with_backend(backend: Arc<dyn SignerBackend>) -> Arc<Self> {
        Self::new(Some(backend))
    }

    /// Session with no signing environment; `connect` reports `ProviderAbsent`
    pub fn absent() -> Arc<Self> {
        Self::new(None)
    }

    /// Request account access and establish a fresh session
    pub async fn connect(self: &Arc<Self>) -> Result<Session> {
        let backend = self.backend.clone().ok_or(Error::ProviderAbsent)?;

        // subscribe before prompting so no change notification is missed
        self.start_listener(backend.as_ref());
        let started_at = self.generation.load(Ordering::SeqCst);

        debug!("Requesting wallet accounts");
        let accounts = backend.request_accounts().await.map_err(|e| {
            warn!("Wallet connection failed: {}", e);
            e
        })?;
        let account = accounts
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotConnected("wallet returned no accounts".to_string()))?;
        let chain_id = backend.chain_id().await?;

        // a change notification arrived while we were prompting
        let generation = match self.generation.compare_exchange(
            started_at,
            started_at + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => started_at + 1,
            Err(_) => {
                warn!("Wallet changed during connect; discarding accounts");
                return Err(Error::NotConnected(
                    "wallet account or network changed while connecting".to_string(),
                ));
            }
        };

        let session = Session {
            account,
            chain_id,
            generation,
        };
        self.current.send_replace(Some(session.clone()));

        info!(
            "Wallet connected: account {} on chain {}",
            session.account, session.chain_id
        );
        Ok(session)
    }

    fn start_listener(self: &Arc<Self>, backend: &dyn SignerBackend) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut events = backend.subscribe();
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => match weak.upgrade() {
                        Some(session) => session.handle_event(event),
                        None => break,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // missed notifications still mean the session may be stale
                        warn!("Missed {} wallet notifications", skipped);
                        match weak.upgrade() {
                            Some(session) => session.invalidate("missed wallet notifications"),
                            None => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Wallet notification listener stopped");
        });
    }

    /// Apply a provider notification
    pub fn handle_event(&self, event: ProviderEvent) {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let next = accounts
                    .first()
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "none".to_string());
                self.invalidate(&format!("account changed to {}", next));
            }
            ProviderEvent::ChainChanged(chain_id) => {
                self.invalidate(&format!("network changed to chain {}", chain_id));
            }
        }
    }

    fn invalidate(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let had_session = self.current.send_replace(None).is_some();
        if had_session {
            info!("Wallet session invalidated: {}", reason);
        } else {
            debug!("Wallet notification with no active session: {}", reason);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.borrow().is_some()
    }

    pub fn current_account(&self) -> Option<Address> {
        self.current.borrow().as_ref().map(|s| s.account.clone())
    }

    /// Snapshot of the live session, if any
    pub fn snapshot(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    /// Snapshot of the live session or `NotConnected`
    pub fn require(&self) -> Result<Session> {
        self.snapshot()
            .ok_or_else(|| Error::NotConnected("connect a wallet first".to_string()))
    }

    /// Whether a previously taken snapshot still describes the live session
    pub fn is_current(&self, session: &Session) -> bool {
        self.generation.load(Ordering::SeqCst) == session.generation
            && self.current.borrow().as_ref() == Some(session)
    }

    /// Watch session changes (connect / invalidate)
    pub fn watch(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }
}

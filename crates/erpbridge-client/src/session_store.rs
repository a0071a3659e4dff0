//! Session cache with single-flight logins
//!
//! Service-account sessions are cached per account and credentials. The first caller
//! that finds no session starts a login and publishes it as a shared future;
//! every concurrent caller for the same account awaits that same future
//! instead of logging in again. The lock is never held across network I/O.
//!
//! Logins run on their own task and settle the cache themselves, so a caller
//! that gives up (deadline, cancellation) never aborts a login other callers
//! are waiting on.

use crate::auth::Authenticator;
use crate::error::RpcError;
use crate::identity::{Identity, ServiceAccount, Session};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type SharedLogin = Shared<BoxFuture<'static, Result<Session, RpcError>>>;

enum Slot {
    Ready(Session),
    Pending { flight: u64, login: SharedLogin },
}

/// Account name, database and login. Two accounts sharing a name but not
/// credentials get separate sessions.
type SessionKey = (String, String, String);

type Slots = Arc<Mutex<HashMap<SessionKey, Slot>>>;

fn key_for(account: &ServiceAccount) -> SessionKey {
    let credentials = account.credentials();
    (
        account.name().to_string(),
        credentials.database().to_string(),
        credentials.login().to_string(),
    )
}

/// Keyed cache of service-account sessions
pub struct SessionStore {
    authenticator: Arc<dyn Authenticator>,
    slots: Slots,
    flights: AtomicU64,
}

impl SessionStore {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            slots: Arc::new(Mutex::new(HashMap::new())),
            flights: AtomicU64::new(0),
        }
    }

    /// Session to use for `identity`.
    ///
    /// User identities carry their own token and are returned as-is.
    /// Service accounts get the cached session, join a login already in
    /// flight, or start one.
    pub async fn get_or_authenticate(&self, identity: &Identity) -> Result<Session, RpcError> {
        match identity {
            Identity::User { session_token } => Ok(Session::for_user(session_token.clone())),
            Identity::ServiceAccount(account) => self.session_for(account).await,
        }
    }

    async fn session_for(&self, account: &ServiceAccount) -> Result<Session, RpcError> {
        let key = key_for(account);
        let login = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready(session)) => return Ok(session.clone()),
                Some(Slot::Pending { login, .. }) => {
                    debug!(account = %account.name(), "Joining in-flight login");
                    login.clone()
                }
                None => {
                    let (flight, login) = self.start_login(account, key.clone());
                    slots.insert(
                        key,
                        Slot::Pending {
                            flight,
                            login: login.clone(),
                        },
                    );
                    login
                }
            }
        };

        login.await
    }

    /// Spawn the login. Must be called with the slot lock held so the task
    /// cannot settle before its `Pending` slot exists.
    ///
    /// The authenticator runs on an inner task; the outer task settles the
    /// slot whether the inner one returns, fails or panics.
    fn start_login(&self, account: &ServiceAccount, key: SessionKey) -> (u64, SharedLogin) {
        let flight = self.flights.fetch_add(1, Ordering::Relaxed);
        let authenticator = Arc::clone(&self.authenticator);
        let slots = Arc::clone(&self.slots);
        let account = account.clone();

        debug!(account = %account.name(), flight, "Starting login");

        let task = tokio::spawn(async move {
            let name = account.name().to_string();
            let attempt =
                tokio::spawn(async move { authenticator.authenticate(&account).await }).await;
            let outcome = attempt.unwrap_or_else(|e| {
                warn!(account = %name, flight, error = %e, "Login task failed");
                Err(RpcError::transport(format!("login task failed: {}", e)))
            });

            let mut slots = slots.lock().await;
            let owns_slot = matches!(
                slots.get(&key),
                Some(Slot::Pending { flight: current, .. }) if *current == flight
            );
            if owns_slot {
                match &outcome {
                    Ok(session) => {
                        slots.insert(key, Slot::Ready(session.clone()));
                    }
                    Err(_) => {
                        slots.remove(&key);
                    }
                }
            }

            outcome
        });

        let login = async move {
            task.await.unwrap_or_else(|e| {
                Err(RpcError::transport(format!("login task failed: {}", e)))
            })
        }
        .boxed()
        .shared();

        (flight, login)
    }

    /// Drop the cached session for `identity`; the next request logs in again.
    ///
    /// A login already in flight is left alone: it is newer than anything
    /// that could have been cached.
    pub async fn invalidate(&self, identity: &Identity) {
        let Identity::ServiceAccount(account) = identity else {
            return;
        };

        let key = key_for(account);
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(&key), Some(Slot::Ready(_))) {
            slots.remove(&key);
            info!(account = %account.name(), "Session evicted");
        }
    }

    /// Evict the cached session only if it is still `stale`.
    ///
    /// Callers that all failed on the same expired session evict it once;
    /// a replacement cached by an earlier caller survives.
    pub async fn invalidate_stale(&self, identity: &Identity, stale: &Session) {
        let Identity::ServiceAccount(account) = identity else {
            return;
        };

        let key = key_for(account);
        let mut slots = self.slots.lock().await;
        let is_stale = matches!(
            slots.get(&key),
            Some(Slot::Ready(current)) if current.token() == stale.token()
        );
        if is_stale {
            slots.remove(&key);
            info!(account = %account.name(), "Expired session evicted");
        }
    }

    /// Cached session for `identity`, if one is ready
    pub async fn cached(&self, identity: &Identity) -> Option<Session> {
        let Identity::ServiceAccount(account) = identity else {
            return None;
        };

        match self.slots.lock().await.get(&key_for(account)) {
            Some(Slot::Ready(session)) => Some(session.clone()),
            _ => None,
        }
    }
}

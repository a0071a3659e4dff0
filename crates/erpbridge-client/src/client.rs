//! Client assembly
//!
//! [`ErpClient`] wires transport, authenticator, session store, invoker and
//! retry coordinator together once, then hands out [`QueryHelpers`] bound to
//! a user or a service account. Every handle shares the same session cache.

use crate::auth::SessionAuthenticator;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::identity::{Identity, Session};
use crate::invoker::RpcInvoker;
use crate::query::QueryHelpers;
use crate::retry::RetryCoordinator;
use crate::session_store::SessionStore;
use crate::transport::{HttpTransport, Transport};
use crate::wire::CorrelationIds;
use std::sync::Arc;
use tracing::info;

/// Entry point for talking to the ERP backend
pub struct ErpClient {
    config: ClientConfig,
    store: Arc<SessionStore>,
    coordinator: Arc<RetryCoordinator>,
    ids: Arc<CorrelationIds>,
}

impl ErpClient {
    /// Build a client that talks HTTP to `config.base_url`
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let transport = HttpTransport::new(
            config.base_url.clone(),
            config.cookie_name.clone(),
            config.timeout(),
            &config.user_agent,
        )?;

        info!(
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            service_accounts = config.service_accounts.len(),
            "ERP client configured"
        );

        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Build a client over any [`Transport`]
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let ids = Arc::new(CorrelationIds::new());

        let authenticator = SessionAuthenticator::new(
            transport.clone(),
            ids.clone(),
            config.login_path.clone(),
            config.cookie_name.clone(),
        )
        .with_body_session_fallback(config.body_session_fallback);

        let store = Arc::new(SessionStore::new(Arc::new(authenticator)));
        let invoker = RpcInvoker::new(transport, config.rpc_path.clone());
        let coordinator = Arc::new(
            RetryCoordinator::new(store.clone(), invoker).with_default_timeout(config.timeout()),
        );

        Self {
            config,
            store,
            coordinator,
            ids,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Queries running as the end user who owns `session_token`
    pub fn as_user(&self, session_token: impl Into<String>) -> QueryHelpers {
        self.helpers(Identity::user(session_token))
    }

    /// Queries running as a configured service account
    pub fn as_service_account(&self, name: &str) -> Result<QueryHelpers> {
        let account = self.config.service_account(name)?;
        Ok(self.helpers(Identity::service_account(account)))
    }

    /// Log a service account in ahead of its first call
    pub async fn login(&self, name: &str) -> Result<Session> {
        let account = self.config.service_account(name)?;
        let session = self
            .store
            .get_or_authenticate(&Identity::service_account(account))
            .await?;
        Ok(session)
    }

    /// Drop the cached session of a service account
    pub async fn logout(&self, name: &str) -> Result<()> {
        let account = self.config.service_account(name)?;
        self.store
            .invalidate(&Identity::service_account(account))
            .await;
        Ok(())
    }

    fn helpers(&self, identity: Identity) -> QueryHelpers {
        QueryHelpers::new(self.coordinator.clone(), self.ids.clone(), identity)
    }
}

//! Login handshake
//!
//! Exchanges service-account credentials for a [`Session`]. The backend
//! issues the session as a cookie, so the token is read from the response
//! headers, not from the JSON body.

use crate::cookies::extract_session_token;
use crate::error::RpcError;
use crate::identity::{ServiceAccount, Session};
use crate::transport::Transport;
use crate::wire::{self, CorrelationIds};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can turn service-account credentials into a session
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, account: &ServiceAccount) -> Result<Session, RpcError>;
}

/// Cookie-based login against the ERP session endpoint
pub struct SessionAuthenticator {
    transport: Arc<dyn Transport>,
    ids: Arc<CorrelationIds>,
    login_path: String,
    cookie_name: String,
    body_session_fallback: bool,
}

impl SessionAuthenticator {
    pub fn new(
        transport: Arc<dyn Transport>,
        ids: Arc<CorrelationIds>,
        login_path: impl Into<String>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            ids,
            login_path: login_path.into(),
            cookie_name: cookie_name.into(),
            body_session_fallback: false,
        }
    }

    /// Accept a `session_id` echoed in the login body when no cookie came back
    pub fn with_body_session_fallback(mut self, enabled: bool) -> Self {
        self.body_session_fallback = enabled;
        self
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, account: &ServiceAccount) -> Result<Session, RpcError> {
        let credentials = account.credentials();
        let correlation_id = self.ids.next_id();
        let body = wire::encode_login(
            credentials.database(),
            credentials.login(),
            credentials.password().expose_secret(),
            correlation_id,
        );

        debug!(
            account = %account.name(),
            database = %credentials.database(),
            correlation_id,
            "Sending login request"
        );

        let response = self.transport.post(&self.login_path, &body, None).await?;

        if !response.is_success() && !wire::is_envelope(&response.body) {
            return Err(RpcError::transport(format!(
                "HTTP {} from login endpoint",
                response.status
            )));
        }

        let result = wire::decode_response(&response.body).map_err(|error| match error {
            RpcError::RemoteFault { message, .. } => RpcError::AuthenticationFailed { message },
            RpcError::SessionExpired => RpcError::auth_failed("login rejected: session expired"),
            other => {
                if let RpcError::Malformed { raw_body } = &other {
                    warn!(
                        account = %account.name(),
                        correlation_id,
                        raw_body = %raw_body,
                        "Malformed login response"
                    );
                }
                other
            }
        })?;

        let reply = wire::decode_login_result(&result).inspect_err(|error| {
            if let RpcError::Malformed { raw_body } = error {
                warn!(
                    account = %account.name(),
                    correlation_id,
                    raw_body = %raw_body,
                    "Malformed login result"
                );
            }
        })?;

        let token = match extract_session_token(&response.cookies, &self.cookie_name) {
            Some(token) => token,
            None => match reply.session_id.clone() {
                Some(token) if self.body_session_fallback => {
                    warn!(
                        account = %account.name(),
                        correlation_id,
                        "No session cookie on login response, using session id from body"
                    );
                    token
                }
                _ => {
                    return Err(RpcError::auth_failed(
                        "login succeeded but no session cookie was issued",
                    ));
                }
            },
        };

        info!(
            account = %account.name(),
            uid = ?reply.uid,
            "Service account session established"
        );

        Ok(Session::for_service_account(account.name(), token)
            .with_profile(reply.uid, reply.display_name))
    }
}

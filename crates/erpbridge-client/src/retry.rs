//! Reauthenticate-and-replay policy
//!
//! One logical call walks `Idle -> Calling -> Done`, or on an expired
//! session `Idle -> Calling -> Reauthenticating -> Replaying -> Done`.
//! The replay happens at most once; a second expiry ends the call with
//! [`RpcError::AuthenticationFailed`]. Every other error is returned as-is.

use crate::error::{RpcError, RpcResult};
use crate::identity::{Identity, Session};
use crate::invoker::RpcInvoker;
use crate::session_store::SessionStore;
use crate::wire::RpcRequest;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-call deadline and cancellation
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for the whole logical call, including any relogin and replay
    pub timeout: Option<Duration>,
    /// Fires to abandon the call
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Observable state of a logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Reauthenticating,
    Replaying,
    Done,
}

enum Step {
    Idle,
    Calling(Session),
    /// Carries the session that just expired
    Reauthenticating(Session),
    Replaying(Session),
    Done(RpcResult<Value>),
}

impl Step {
    fn state(&self) -> CallState {
        match self {
            Step::Idle => CallState::Idle,
            Step::Calling(_) => CallState::Calling,
            Step::Reauthenticating(_) => CallState::Reauthenticating,
            Step::Replaying(_) => CallState::Replaying,
            Step::Done(_) => CallState::Done,
        }
    }
}

pub struct RetryCoordinator {
    store: Arc<SessionStore>,
    invoker: RpcInvoker,
    default_timeout: Option<Duration>,
}

impl RetryCoordinator {
    pub fn new(store: Arc<SessionStore>, invoker: RpcInvoker) -> Self {
        Self {
            store,
            invoker,
            default_timeout: None,
        }
    }

    /// Deadline applied when [`CallOptions::timeout`] is unset
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Run one logical call for `identity`
    pub async fn execute(
        &self,
        identity: &Identity,
        request: &RpcRequest,
        options: &CallOptions,
    ) -> RpcResult<Value> {
        let timeout = options.timeout.or(self.default_timeout);

        let bounded = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.run(identity, request))
                    .await
                    .unwrap_or_else(|_| {
                        debug!(
                            correlation_id = request.correlation_id(),
                            "Call deadline exceeded"
                        );
                        Err(RpcError::timeout())
                    }),
                None => self.run(identity, request).await,
            }
        };

        match &options.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(correlation_id = request.correlation_id(), "Call cancelled");
                        Err(RpcError::Cancelled)
                    }
                    result = bounded => result,
                }
            }
            None => bounded.await,
        }
    }

    async fn run(&self, identity: &Identity, request: &RpcRequest) -> RpcResult<Value> {
        let correlation_id = request.correlation_id();
        let mut step = Step::Idle;

        loop {
            debug!(
                correlation_id,
                identity = %identity.label(),
                state = ?step.state(),
                "Call state"
            );

            step = match step {
                Step::Idle => match self.store.get_or_authenticate(identity).await {
                    Ok(session) => Step::Calling(session),
                    Err(error) => Step::Done(Err(error)),
                },

                Step::Calling(session) => match self.invoker.call(&session, request).await {
                    Err(RpcError::SessionExpired) => match identity {
                        // A forwarded browser session cannot be renewed here
                        Identity::User { .. } => Step::Done(Err(RpcError::auth_failed(
                            "user session rejected by backend",
                        ))),
                        Identity::ServiceAccount(_) => {
                            warn!(
                                correlation_id,
                                identity = %identity.label(),
                                "Session expired, re-authenticating"
                            );
                            Step::Reauthenticating(session)
                        }
                    },
                    outcome => Step::Done(outcome),
                },

                Step::Reauthenticating(expired) => {
                    self.store.invalidate_stale(identity, &expired).await;
                    match self.store.get_or_authenticate(identity).await {
                        Ok(fresh) => Step::Replaying(fresh),
                        Err(error) => Step::Done(Err(error)),
                    }
                }

                Step::Replaying(session) => match self.invoker.call(&session, request).await {
                    Err(RpcError::SessionExpired) => {
                        warn!(
                            correlation_id,
                            identity = %identity.label(),
                            "Session expired again after re-authentication"
                        );
                        Step::Done(Err(RpcError::auth_failed(
                            "session expired again after re-authentication",
                        )))
                    }
                    outcome => Step::Done(outcome),
                },

                Step::Done(result) => {
                    return result.map_err(|error| match error {
                        RpcError::SessionExpired => RpcError::auth_failed("session expired"),
                        other => other,
                    });
                }
            };
        }
    }
}

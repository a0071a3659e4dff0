//! ERP bridge client
//!
//! Session-authenticated JSON-RPC client for an Odoo-style ERP backend.
//! Calls run either as an end user (forwarding their session cookie) or as a
//! configured service account whose session is logged in once, cached, and
//! transparently renewed when the backend reports it expired.

pub mod auth;
pub mod client;
pub mod config;
pub mod cookies;
pub mod error;
pub mod identity;
pub mod invoker;
pub mod query;
pub mod retry;
pub mod session_store;
pub mod transport;
pub mod wire;

// Re-exports
pub use auth::{Authenticator, SessionAuthenticator};
pub use client::ErpClient;
pub use config::{ClientConfig, ClientConfigBuilder, ServiceAccountConfig};
pub use cookies::CookieHeader;
pub use error::{ClientError, ErrorKind, FaultCode, Result, RpcError, RpcResult};
pub use identity::{Credentials, Identity, ServiceAccount, Session, SessionScope};
pub use query::QueryHelpers;
pub use retry::{CallOptions, CallState, RetryCoordinator};
pub use session_store::SessionStore;
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use wire::{CorrelationIds, RpcRequest};

pub use tokio_util::sync::CancellationToken;

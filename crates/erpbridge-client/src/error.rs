//! Error types for the erpbridge client
//!
//! Two families live here. [`RpcError`] is the closed taxonomy every call
//! resolves to; it is a plain value (`Clone`) so one authentication outcome
//! can be handed to every caller waiting on it. [`ClientError`] covers
//! building a client: configuration, validation and HTTP client setup.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for client construction and configuration
pub type Result<T> = std::result::Result<T, ClientError>;

/// Result of one logical RPC call
pub type RpcResult<T = serde_json::Value> = std::result::Result<T, RpcError>;

/// Generic text shown to end users for every non-business failure.
pub const SERVICE_UNAVAILABLE: &str = "cannot reach backend";

/// Error code carried by a remote fault. The backend uses both numbers and
/// strings here depending on the exception path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FaultCode {
    Number(i64),
    Text(String),
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCode::Number(n) => write!(f, "{}", n),
            FaultCode::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for FaultCode {
    fn from(code: i64) -> Self {
        FaultCode::Number(code)
    }
}

impl From<&str> for FaultCode {
    fn from(code: &str) -> Self {
        FaultCode::Text(code.to_string())
    }
}

/// Errors a call can end in
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// Credentials, database name or a forwarded user session were rejected
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The session used for a call is no longer valid. Only seen inside the
    /// retry coordinator; callers of the query helpers never receive it.
    #[error("Session expired")]
    SessionExpired,

    /// The backend understood the call and rejected it
    #[error("Remote fault {code}: {message}")]
    RemoteFault {
        code: FaultCode,
        message: String,
        payload: Option<serde_json::Value>,
    },

    /// Connection, DNS, TLS or deadline failures
    #[error("Transport error: {cause}")]
    Transport { cause: String, timed_out: bool },

    /// Response body did not match the JSON-RPC envelope
    #[error("Malformed response: {raw_body}")]
    Malformed { raw_body: String },

    /// The caller cancelled the logical call
    #[error("Call cancelled")]
    Cancelled,
}

/// Coarse classification of an [`RpcError`], used by the web layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    AuthenticationFailed,
    SessionExpired,
    RemoteFault,
    Transport,
    Malformed,
    Cancelled,
}

impl RpcError {
    /// Create a transport error from any displayable cause
    pub fn transport<S: Into<String>>(cause: S) -> Self {
        Self::Transport {
            cause: cause.into(),
            timed_out: false,
        }
    }

    /// Transport error produced when a call runs past its deadline
    pub fn timeout() -> Self {
        Self::Transport {
            cause: "deadline exceeded".to_string(),
            timed_out: true,
        }
    }

    /// Create an authentication failure with the remote (or local) reason
    pub fn auth_failed<S: Into<String>>(message: S) -> Self {
        Self::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create a malformed-body error, keeping the raw body for diagnostics
    pub fn malformed<S: Into<String>>(raw_body: S) -> Self {
        Self::Malformed {
            raw_body: raw_body.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            RpcError::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            RpcError::SessionExpired => ErrorKind::SessionExpired,
            RpcError::RemoteFault { .. } => ErrorKind::RemoteFault,
            RpcError::Transport { .. } => ErrorKind::Transport,
            RpcError::Malformed { .. } => ErrorKind::Malformed,
            RpcError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error is the retry coordinator's reauthentication signal
    pub fn is_session_expired(&self) -> bool {
        matches!(self, RpcError::SessionExpired)
    }

    /// Message safe to show to an end user.
    ///
    /// Business faults are relayed as-is; everything else collapses to
    /// [`SERVICE_UNAVAILABLE`] so no credential or infrastructure detail leaks.
    pub fn user_message(&self) -> String {
        match self {
            RpcError::RemoteFault { message, .. } => message.clone(),
            RpcError::Cancelled => "request cancelled".to_string(),
            _ => SERVICE_UNAVAILABLE.to_string(),
        }
    }

    /// HTTP status a route handler should answer with for this error
    pub fn http_status(&self) -> u16 {
        match self {
            RpcError::RemoteFault { .. } => 422,
            RpcError::Transport { timed_out: true, .. } => 504,
            RpcError::Cancelled => 499,
            _ => 503,
        }
    }
}

/// Errors raised while building or configuring a client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Parameter validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration file or value errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No service account with this name is configured
    #[error("Unknown service account: {0}")]
    UnknownServiceAccount(String),

    /// I/O errors while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP client construction errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A call to the backend failed
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl ClientError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
}

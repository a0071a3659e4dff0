//! JSON-RPC envelope codec
//!
//! Pure translation between typed requests and the wire documents exchanged
//! with the ERP backend. Nothing in here performs I/O, logs, or fails with a
//! panic; every decode path returns a value.

use crate::error::{FaultCode, RpcError, RpcResult};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicU64, Ordering};

const JSONRPC_VERSION: &str = "2.0";
const ENVELOPE_METHOD: &str = "call";

/// Source of correlation ids for log correlation. Ids are unique per
/// sequence; they are not used to match replies.
#[derive(Debug)]
pub struct CorrelationIds {
    next: AtomicU64,
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// One remote method invocation. Built once, then only read.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    model: String,
    method: String,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    correlation_id: u64,
}

impl RpcRequest {
    pub fn new(model: impl Into<String>, method: impl Into<String>, correlation_id: u64) -> Self {
        Self {
            model: model.into(),
            method: method.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            correlation_id,
        }
    }

    /// Set the positional arguments
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Set the keyword arguments
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Add a single keyword argument
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }
}

fn envelope(params: Value, correlation_id: u64) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": ENVELOPE_METHOD,
        "params": params,
        "id": correlation_id,
    })
}

/// Build the login envelope
pub fn encode_login(database: &str, login: &str, password: &str, correlation_id: u64) -> Value {
    envelope(
        json!({
            "db": database,
            "login": login,
            "password": password,
        }),
        correlation_id,
    )
}

/// Build the envelope for a model method call
pub fn encode_call(request: &RpcRequest) -> Value {
    envelope(
        json!({
            "model": request.model,
            "method": request.method,
            "args": request.args,
            "kwargs": request.kwargs,
        }),
        request.correlation_id,
    )
}

/// Decode a raw response body into the call result or a classified error.
///
/// Bodies that are not a JSON object with a `result` or `error` key become
/// [`RpcError::Malformed`] carrying the body text.
pub fn decode_response(raw: &[u8]) -> RpcResult<Value> {
    let malformed = || RpcError::malformed(String::from_utf8_lossy(raw));

    let mut document = match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => return Err(malformed()),
    };

    // JSON-RPC 1.0 style gateways send `"error": null` next to a result
    if let Some(error) = document.remove("error").filter(|error| !error.is_null()) {
        return Err(classify_error(error).unwrap_or_else(malformed));
    }

    document.remove("result").ok_or_else(malformed)
}

/// Whether a raw body at least looks like a JSON-RPC envelope
pub fn is_envelope(raw: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map.contains_key("result") || map.contains_key("error"),
        _ => false,
    }
}

/// Map a structured error object onto the error taxonomy.
///
/// Returns `None` when the object lacks the fields every error carries.
fn classify_error(error: Value) -> Option<RpcError> {
    let Value::Object(mut error) = error else {
        return None;
    };

    let message = error.get("message")?.as_str()?.to_string();
    let code = match error.remove("code") {
        Some(Value::Number(n)) => FaultCode::Number(n.as_i64()?),
        Some(Value::String(s)) => FaultCode::Text(s),
        _ => return None,
    };
    let payload = error.remove("data").filter(|data| !data.is_null());

    let exception = payload
        .as_ref()
        .and_then(|data| data.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let detail = payload
        .as_ref()
        .and_then(|data| data.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if exception.ends_with("SessionExpiredException")
        || mentions_session_expired(&message)
        || mentions_session_expired(detail)
    {
        return Some(RpcError::SessionExpired);
    }

    if exception.ends_with("AccessDenied") {
        let reason = if detail.is_empty() { message } else { detail.to_string() };
        return Some(RpcError::AuthenticationFailed { message: reason });
    }

    Some(RpcError::RemoteFault {
        code,
        message,
        payload,
    })
}

fn mentions_session_expired(text: &str) -> bool {
    text.to_ascii_lowercase().contains("session expired")
}

/// Fields the backend echoes on a successful login
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoginReply {
    pub uid: Option<i64>,
    pub display_name: Option<String>,
    /// Session id some deployments also echo in the body
    pub session_id: Option<String>,
}

/// Interpret the `result` of a login call.
///
/// A `uid` of `false`, `null`, or no `uid` at all means the backend refused
/// the credentials without raising an error object.
pub fn decode_login_result(result: &Value) -> RpcResult<LoginReply> {
    let Some(fields) = result.as_object() else {
        return Err(RpcError::malformed(result.to_string()));
    };

    let uid = match fields.get("uid") {
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    let Some(uid) = uid else {
        return Err(RpcError::auth_failed("login rejected: no user id returned"));
    };

    Ok(LoginReply {
        uid: Some(uid),
        display_name: fields.get("name").and_then(Value::as_str).map(str::to_string),
        session_id: fields
            .get("session_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
    })
}

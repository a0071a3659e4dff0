//! Single RPC execution with an already-obtained session
//!
//! No retries and no session lookups happen here; see the retry module for
//! the policy built on top.

use crate::error::{RpcError, RpcResult};
use crate::identity::Session;
use crate::transport::Transport;
use crate::wire::{self, RpcRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RpcInvoker {
    transport: Arc<dyn Transport>,
    rpc_path: String,
}

impl RpcInvoker {
    pub fn new(transport: Arc<dyn Transport>, rpc_path: impl Into<String>) -> Self {
        Self {
            transport,
            rpc_path: rpc_path.into(),
        }
    }

    /// Endpoint for a request; model and method are appended for readable
    /// server access logs, the body still carries both.
    fn path_for(&self, request: &RpcRequest) -> String {
        format!(
            "{}/{}/{}",
            self.rpc_path.trim_end_matches('/'),
            request.model(),
            request.method()
        )
    }

    /// Send `request` once, presenting `session`
    pub async fn call(&self, session: &Session, request: &RpcRequest) -> RpcResult<Value> {
        let body = wire::encode_call(request);
        let path = self.path_for(request);

        debug!(
            correlation_id = request.correlation_id(),
            model = %request.model(),
            method = %request.method(),
            "Sending RPC request"
        );

        let response = self
            .transport
            .post(&path, &body, Some(session.token()))
            .await?;

        if !response.is_success() && !wire::is_envelope(&response.body) {
            return Err(RpcError::transport(format!(
                "HTTP {} from {}",
                response.status, path
            )));
        }

        let decoded = wire::decode_response(&response.body);

        if let Err(RpcError::Malformed { raw_body }) = &decoded {
            warn!(
                correlation_id = request.correlation_id(),
                model = %request.model(),
                method = %request.method(),
                raw_body = %raw_body,
                "Malformed RPC response"
            );
        }

        decoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use crate::transport::testing::ScriptedTransport;
    use serde_json::json;
    use tracing_test::traced_test;

    const SEARCH_READ: &str = "/web/dataset/call_kw/res.partner/search_read";

    fn invoker(transport: ScriptedTransport) -> (RpcInvoker, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        (
            RpcInvoker::new(transport.clone(), "/web/dataset/call_kw"),
            transport,
        )
    }

    fn request() -> RpcRequest {
        RpcRequest::new("res.partner", "search_read", 9)
            .with_args(vec![json!([["name", "=", "Acme"]])])
    }

    #[tokio::test]
    async fn test_call_presents_session_and_decodes_result() {
        let (invoker, transport) = invoker(
            ScriptedTransport::new()
                .reply_json(SEARCH_READ, json!({"result": [{"id": 7, "name": "Acme"}]})),
        );

        let session = Session::for_user("tok-1");
        let result = invoker.call(&session, &request()).await;

        assert_eq!(result, Ok(json!([{"id": 7, "name": "Acme"}])));

        let hits = transport.hits();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].token.as_deref(), Some("tok-1"));
        assert_eq!(hits[0].body["id"], 9);
        assert_eq!(hits[0].body["params"]["model"], "res.partner");
    }

    #[tokio::test]
    async fn test_call_surfaces_session_expiry() {
        let (invoker, _) = invoker(ScriptedTransport::new().reply_json(
            SEARCH_READ,
            json!({"error": {"code": 100, "message": "Odoo Session Expired",
                "data": {"name": "odoo.http.SessionExpiredException"}}}),
        ));

        let result = invoker.call(&Session::for_user("old"), &request()).await;
        assert_eq!(result, Err(RpcError::SessionExpired));
    }

    #[tokio::test]
    async fn test_non_envelope_error_status_is_transport_error() {
        let mut reply = TransportResponse::ok("upstream connect error");
        reply.status = 503;
        let (invoker, _) = invoker(ScriptedTransport::new().reply(SEARCH_READ, reply));

        match invoker.call(&Session::for_user("tok"), &request()).await {
            Err(RpcError::Transport { cause, timed_out }) => {
                assert!(cause.contains("503"));
                assert!(!timed_out);
            }
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_envelope_with_error_status_is_decoded() {
        let mut reply = TransportResponse::ok(
            json!({"error": {"code": 404, "message": "Model not found: res.partnr"}}).to_string(),
        );
        reply.status = 404;
        let (invoker, _) = invoker(ScriptedTransport::new().reply(SEARCH_READ, reply));

        let result = invoker.call(&Session::for_user("tok"), &request()).await;
        assert!(matches!(result, Err(RpcError::RemoteFault { .. })));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_body_is_logged_with_raw_body() {
        let (invoker, _) = invoker(
            ScriptedTransport::new().reply(SEARCH_READ, TransportResponse::ok("{\"jsonrpc\":\"2.0\"}")),
        );

        let result = invoker.call(&Session::for_user("tok"), &request()).await;

        assert!(matches!(result, Err(RpcError::Malformed { .. })));
        assert!(logs_contain("Malformed RPC response"));
        assert!(logs_contain("jsonrpc"));
    }
}

//! Transport abstraction layer for ERP communication

use crate::cookies::{CookieHeader, cookie_header_value};
use crate::error::{ClientError, RpcError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use std::time::Duration;
use url::Url;

/// Raw reply to one POST
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub cookies: CookieHeader,
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// 200 reply carrying a body and no cookies
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            cookies: CookieHeader::empty(),
            body: body.into(),
        }
    }

    pub fn with_cookies(mut self, cookies: CookieHeader) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstraction over the HTTP round trip
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body to `path`, optionally presenting a session token
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        session_token: Option<&str>,
    ) -> Result<TransportResponse, RpcError>;
}

/// `reqwest`-backed transport
pub struct HttpTransport {
    client: Client,
    base_url: Url,
    cookie_name: String,
}

impl HttpTransport {
    /// Only connecting is bounded here. Whole-call deadlines belong to the
    /// retry coordinator so per-call timeouts can exceed the default.
    pub fn new(
        base_url: Url,
        cookie_name: impl Into<String>,
        connect_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self::with_http_client(client, base_url, cookie_name))
    }

    /// Use a custom HTTP client (for connection pool reuse or testing)
    pub fn with_http_client(client: Client, base_url: Url, cookie_name: impl Into<String>) -> Self {
        Self {
            client,
            base_url,
            cookie_name: cookie_name.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        session_token: Option<&str>,
    ) -> Result<TransportResponse, RpcError> {
        let mut request = self
            .client
            .post(self.endpoint(path))
            .header(CONTENT_TYPE, "application/json")
            .json(body);

        if let Some(token) = session_token {
            request = request.header(COOKIE, cookie_header_value(&self.cookie_name, token));
        }

        let response = request.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let cookies = CookieHeader::Multi(
            response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::to_string)
                .collect(),
        );

        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            cookies,
            body: body.to_vec(),
        })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> RpcError {
    if error.is_timeout() {
        RpcError::timeout()
    } else {
        RpcError::transport(error.to_string())
    }
}

/// Scripted transport for unit tests
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    pub(crate) enum Scripted {
        Reply(TransportResponse),
        Fail(RpcError),
    }

    /// One recorded POST
    #[derive(Debug, Clone)]
    pub(crate) struct Hit {
        pub path: String,
        pub token: Option<String>,
        pub body: serde_json::Value,
    }

    /// Replays queued replies per path. The last reply of a queue repeats.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
        hits: Mutex<Vec<Hit>>,
        expired_tokens: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn reply(self, path: &str, reply: TransportResponse) -> Self {
            self.push(path, Scripted::Reply(reply));
            self
        }

        pub(crate) fn reply_json(self, path: &str, body: serde_json::Value) -> Self {
            self.reply(path, TransportResponse::ok(body.to_string()))
        }

        /// Any call presenting `token` gets a session-expired error body
        pub(crate) fn expire_token(self, token: &str) -> Self {
            self.expired_tokens.lock().unwrap().push(token.to_string());
            self
        }

        pub(crate) fn fail(self, path: &str, error: RpcError) -> Self {
            self.push(path, Scripted::Fail(error));
            self
        }

        fn push(&self, path: &str, scripted: Scripted) {
            self.routes
                .lock()
                .unwrap()
                .entry(path.to_string())
                .or_default()
                .push_back(scripted);
        }

        pub(crate) fn hits(&self) -> Vec<Hit> {
            self.hits.lock().unwrap().clone()
        }

        pub(crate) fn hit_count(&self, path: &str) -> usize {
            self.hits
                .lock()
                .unwrap()
                .iter()
                .filter(|hit| hit.path == path)
                .count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn post(
            &self,
            path: &str,
            body: &serde_json::Value,
            session_token: Option<&str>,
        ) -> Result<TransportResponse, RpcError> {
            self.hits.lock().unwrap().push(Hit {
                path: path.to_string(),
                token: session_token.map(str::to_string),
                body: body.clone(),
            });

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let expired = session_token
                .is_some_and(|token| self.expired_tokens.lock().unwrap().iter().any(|t| t == token));
            if expired {
                return Ok(TransportResponse::ok(
                    serde_json::json!({"error": {
                        "code": 100,
                        "message": "Odoo Session Expired",
                        "data": {"name": "odoo.http.SessionExpiredException"}
                    }})
                    .to_string(),
                ));
            }

            let mut routes = self.routes.lock().unwrap();
            let queue = routes
                .get_mut(path)
                .ok_or_else(|| RpcError::transport(format!("no scripted reply for {}", path)))?;

            let scripted = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().map(|s| match s {
                    Scripted::Reply(r) => Scripted::Reply(r.clone()),
                    Scripted::Fail(e) => Scripted::Fail(e.clone()),
                })
            };

            match scripted {
                Some(Scripted::Reply(reply)) => Ok(reply),
                Some(Scripted::Fail(error)) => Err(error),
                None => Err(RpcError::transport(format!("no scripted reply for {}", path))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport_for(server: &MockServer) -> HttpTransport {
        HttpTransport::new(
            server.uri().parse().unwrap(),
            "session_id",
            Duration::from_secs(5),
            "erpbridge-test",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_sends_session_cookie() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/web/dataset/call_kw"))
            .and(header("cookie", "session_id=tok123"))
            .and(body_partial_json(json!({"jsonrpc": "2.0"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"result":true}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let response = transport
            .post("/web/dataset/call_kw", &json!({"jsonrpc": "2.0"}), Some("tok123"))
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, br#"{"result":true}"#.to_vec());
    }

    #[tokio::test]
    async fn test_post_collects_every_set_cookie() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/web/session/authenticate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .append_header("set-cookie", "frontend_lang=en_US; Path=/")
                    .append_header("set-cookie", "session_id=abc; HttpOnly; Path=/")
                    .set_body_string(r#"{"result":{"uid":2}}"#),
            )
            .mount(&mock_server)
            .await;

        let transport = transport_for(&mock_server);
        let response = transport
            .post("/web/session/authenticate", &json!({}), None)
            .await
            .unwrap();

        match response.cookies {
            CookieHeader::Multi(values) => {
                assert_eq!(values.len(), 2);
                assert!(values.iter().any(|v| v.starts_with("session_id=abc")));
            }
            other => panic!("Expected multi-value cookies, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        // Port 9 (discard) is closed on test machines
        let transport = HttpTransport::new(
            "http://127.0.0.1:9".parse().unwrap(),
            "session_id",
            Duration::from_secs(2),
            "erpbridge-test",
        )
        .unwrap();

        let result = transport.post("/web/dataset/call_kw", &json!({}), None).await;
        assert!(matches!(result, Err(RpcError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"result":true}"#)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let client = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let transport = HttpTransport::with_http_client(
            client,
            mock_server.uri().parse().unwrap(),
            "session_id",
        );

        let result = transport.post("/slow", &json!({}), None).await;
        assert_eq!(result.unwrap_err(), RpcError::timeout());
    }

    #[tokio::test]
    async fn test_connect_timeout_does_not_cap_slow_replies() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"result":true}"#)
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::new(
            mock_server.uri().parse().unwrap(),
            "session_id",
            Duration::from_millis(100),
            "erpbridge-test",
        )
        .unwrap();

        let response = transport.post("/slow", &json!({}), None).await.unwrap();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let transport = HttpTransport::with_http_client(
            Client::new(),
            "https://erp.example.com/odoo/".parse().unwrap(),
            "session_id",
        );
        assert_eq!(
            transport.endpoint("/web/session/authenticate"),
            "https://erp.example.com/odoo/web/session/authenticate"
        );
    }
}

//! Blocking HTTP client for the controller's RPC endpoint.
//!
//! - Blocking client using `ureq` (no async); callers fan out with threads.
//! - One JSON envelope per call, posted to `{host}/rpc`.
//!
//! Authentication
//! - Sends Basic credentials up front when a password is configured.
//! - On a 401 carrying a Digest challenge, answers it and retries once.

use log::debug;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::ConnectionOptions;
use crate::digest::{self, DigestChallenge};
use crate::error::RpcError;
use crate::models::rpc::{RpcRequest, RpcResponse};

/// What the negotiator needs from an HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub www_authenticate: Option<String>,
    pub body: String,
}

/// A single POST of a JSON body. `Err` means no HTTP reply was obtained.
pub trait HttpTransport: Send + Sync {
    fn post_json(&self, url: &str, authorization: Option<&str>, body: &str) -> Result<HttpReply, String>;
}

pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// `timeout` bounds the whole exchange, connect through body read.
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        UreqTransport { agent: config.into() }
    }
}

impl HttpTransport for UreqTransport {
    fn post_json(&self, url: &str, authorization: Option<&str>, body: &str) -> Result<HttpReply, String> {
        let mut req = self
            .agent
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        if let Some(auth) = authorization {
            req = req.header("Authorization", auth);
        }

        let mut res = req.send(body).map_err(|e| e.to_string())?;
        let status = res.status().as_u16();
        let www_authenticate = joined_challenges(res.headers());
        let body = res.body_mut().read_to_string().map_err(|e| e.to_string())?;

        Ok(HttpReply {
            status,
            www_authenticate,
            body,
        })
    }
}

/// Every `WWW-Authenticate` field of a reply, joined the way a single
/// multi-challenge field would be written.
fn joined_challenges(headers: &http::HeaderMap) -> Option<String> {
    let values: Vec<&str> = headers
        .get_all(http::header::WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!values.is_empty()).then(|| values.join(", "))
}

pub struct RpcClient {
    options: ConnectionOptions,
    transport: Arc<dyn HttpTransport>,
    next_id: AtomicU64,
    cnonce: fn() -> String,
}

impl RpcClient {
    pub fn new(options: ConnectionOptions) -> Self {
        let transport = Arc::new(UreqTransport::new(options.timeout));
        Self::with_transport(options, transport)
    }

    pub fn with_transport(options: ConnectionOptions, transport: Arc<dyn HttpTransport>) -> Self {
        RpcClient {
            options,
            transport,
            next_id: AtomicU64::new(1),
            cnonce: digest::random_cnonce,
        }
    }

    /// Replace the client nonce generator, for reproducible digests.
    #[cfg(test)]
    pub fn with_cnonce(mut self, cnonce: fn() -> String) -> Self {
        self.cnonce = cnonce;
        self
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn next_request(&self, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        }
    }

    /// Send one call and return its `result`.
    ///
    /// This does not consult the allow-list; go through
    /// [`crate::guard::GuardedClient`] for anything caller-controlled.
    pub fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = self.next_request(method, params);
        let body = serde_json::to_string(&request).map_err(|e| RpcError::Transport {
            method: method.to_string(),
            status: None,
            message: format!("encoding request failed: {}", e),
        })?;
        debug!("rpc #{} {} -> {}", request.id, method, self.options.host);

        let reply = self.exchange(method, &body)?;
        if !(200..300).contains(&reply.status) {
            return Err(RpcError::Transport {
                method: method.to_string(),
                status: Some(reply.status),
                message: summarize_body(&reply.body),
            });
        }

        let de = &mut serde_json::Deserializer::from_str(&reply.body);
        let envelope: RpcResponse = serde_path_to_error::deserialize(de).map_err(|e| RpcError::Transport {
            method: method.to_string(),
            status: Some(reply.status),
            message: format!("invalid response body at {}: {}", e.path(), e.inner()),
        })?;

        if let Some(id) = envelope.id
            && id != request.id
        {
            debug!("{} reply id {} does not match request id {}", method, id, request.id);
        }
        if let Some(err) = envelope.error {
            return Err(RpcError::Application {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }

    /// Post `body`, answering at most one Digest challenge.
    fn exchange(&self, method: &str, body: &str) -> Result<HttpReply, RpcError> {
        let url = self.options.rpc_url();
        let credentials = self.options.credentials();
        let basic = credentials.map(|(user, pass)| digest::basic_header(user, pass));

        let first = self.post(method, &url, basic.as_deref(), body)?;
        if first.status != 401 {
            return Ok(first);
        }

        let challenge = first.www_authenticate.as_deref().and_then(DigestChallenge::parse);
        let (Some((user, pass)), Some(challenge)) = (credentials, challenge) else {
            debug!("{} got 401 without a usable digest challenge", method);
            return Ok(first);
        };

        let cnonce = (self.cnonce)();
        let header = digest::authorization_header(&challenge, user, pass, "POST", &request_path(&url), &cnonce);
        debug!(
            "{} answering digest challenge (realm={}, algorithm={})",
            method,
            challenge.realm,
            challenge.algorithm().name()
        );
        self.post(method, &url, Some(&header), body)
    }

    fn post(&self, method: &str, url: &str, authorization: Option<&str>, body: &str) -> Result<HttpReply, RpcError> {
        self.transport
            .post_json(url, authorization, body)
            .map_err(|message| RpcError::Transport {
                method: method.to_string(),
                status: None,
                message,
            })
    }
}

/// Path component of an absolute URL, as used in the digest `uri` field.
fn request_path(url: &str) -> String {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    match after_scheme.find('/') {
        Some(i) => after_scheme[i..].to_string(),
        None => "/".to_string(),
    }
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::from("<no body>");
    }
    trimmed.chars().take(200).collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::digest::{Algorithm, DigestInput, compute_response};
    use crate::error::ErrorKind;
    use serde_json::json;

    const CHALLENGE: &str = r#"Digest qop="auth", realm="shellyblugw-a1b2", nonce="6613ea2f", algorithm=SHA-256"#;

    fn fixed_cnonce() -> String {
        "0a4f113b".to_string()
    }

    fn options(password: Option<&str>) -> ConnectionOptions {
        ConnectionOptions::new(Some("10.0.0.9")).with_credentials(None, password.map(str::to_string))
    }

    fn client(password: Option<&str>, transport: &Arc<FakeTransport>) -> RpcClient {
        RpcClient::with_transport(options(password), transport.clone()).with_cnonce(fixed_cnonce)
    }

    #[test]
    fn returns_result_and_posts_envelope() {
        let transport = Arc::new(FakeTransport::new(|call| result(call, json!({"name": "gw"}))));
        let c = client(None, &transport);

        assert_eq!(c.send("Shelly.GetDeviceInfo", json!({})).unwrap(), json!({"name": "gw"}));
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].url, "http://10.0.0.9/rpc");
        assert_eq!(calls[0].authorization, None);
        assert_eq!(
            calls[0].body,
            json!({"id": 1, "method": "Shelly.GetDeviceInfo", "params": {}})
        );
    }

    #[test]
    fn request_ids_are_per_instance() {
        let transport = Arc::new(FakeTransport::new(|call| result(call, Value::Null)));
        let a = client(None, &transport);
        let b = client(None, &transport);
        a.send("Sys.GetStatus", json!({})).unwrap();
        a.send("Sys.GetStatus", json!({})).unwrap();
        b.send("Sys.GetStatus", json!({})).unwrap();

        let ids: Vec<_> = transport.calls().iter().map(|c| c.body["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 1]);
    }

    #[test]
    fn sends_basic_then_answers_digest_once() {
        let transport = Arc::new(FakeTransport::new(|call| match call.authorization.as_deref() {
            Some(a) if a.starts_with("Digest ") => result(call, json!(true)),
            _ => challenge(CHALLENGE),
        }));
        let c = client(Some("pw"), &transport);

        assert_eq!(c.send("Sys.GetStatus", json!({})).unwrap(), json!(true));

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].authorization.as_deref(), Some("Basic YWRtaW46cHc="));

        let expected = compute_response(
            Algorithm::Sha256,
            &DigestInput {
                username: "admin",
                password: "pw",
                realm: "shellyblugw-a1b2",
                nonce: "6613ea2f",
                method: "POST",
                uri: "/rpc",
                cnonce: "0a4f113b",
                qop: Some("auth"),
            },
        );
        let digest = calls[1].authorization.clone().unwrap();
        assert!(digest.contains(&format!("response=\"{expected}\"")), "{digest}");
        assert!(digest.contains("nc=00000001"));
        assert!(digest.contains("algorithm=SHA-256"));
    }

    #[test]
    fn separate_challenge_fields_are_joined() {
        let mut headers = http::HeaderMap::new();
        assert_eq!(joined_challenges(&headers), None);

        headers.append(http::header::WWW_AUTHENTICATE, http::HeaderValue::from_static(r#"Basic realm="gw""#));
        headers.append(http::header::WWW_AUTHENTICATE, http::HeaderValue::from_static(CHALLENGE));
        let joined = joined_challenges(&headers).unwrap();
        assert_eq!(joined, format!(r#"Basic realm="gw", {CHALLENGE}"#));

        let parsed = DigestChallenge::parse(&joined).unwrap();
        assert_eq!(parsed.realm, "shellyblugw-a1b2");
        assert_eq!(parsed.nonce, "6613ea2f");
    }

    #[test]
    fn digest_offered_after_basic_is_answered() {
        let transport = Arc::new(FakeTransport::new(|call| match call.authorization.as_deref() {
            Some(a) if a.starts_with("Digest ") => result(call, json!(true)),
            _ => challenge(&format!(r#"Basic realm="gw", {CHALLENGE}"#)),
        }));
        let c = client(Some("pw"), &transport);

        assert_eq!(c.send("Sys.GetStatus", json!({})).unwrap(), json!(true));
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn md5_challenge_without_algorithm_is_answered() {
        let transport = Arc::new(FakeTransport::new(|call| match call.authorization.as_deref() {
            Some(a) if a.starts_with("Digest ") => result(call, json!({"ok": true})),
            _ => challenge(r#"Digest realm="shellyblugw-a1b2", nonce="5e1d9c", qop="auth""#),
        }));
        let c = client(Some("pw"), &transport);

        assert_eq!(c.send("Shelly.GetStatus", json!({})).unwrap(), json!({"ok": true}));

        let expected = compute_response(
            Algorithm::Md5,
            &DigestInput {
                username: "admin",
                password: "pw",
                realm: "shellyblugw-a1b2",
                nonce: "5e1d9c",
                method: "POST",
                uri: "/rpc",
                cnonce: "0a4f113b",
                qop: Some("auth"),
            },
        );
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let digest = calls[1].authorization.clone().unwrap();
        assert!(digest.contains(&format!("response=\"{expected}\"")), "{digest}");
        assert!(digest.contains("qop=auth"), "{digest}");
        assert!(!digest.contains("algorithm="), "{digest}");
    }

    #[test]
    fn second_401_is_an_authentication_error() {
        let transport = Arc::new(FakeTransport::new(|_| challenge(CHALLENGE)));
        let c = client(Some("wrong"), &transport);

        let err = c.send("Shelly.GetDeviceInfo", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.status(), Some(401));
        assert_eq!(transport.calls().len(), 2);
    }

    #[test]
    fn malformed_challenge_is_not_retried() {
        for header in [r#"Digest realm="only-realm""#, r#"Basic realm="x""#, "garbage"] {
            let transport = Arc::new(FakeTransport::new(move |_| challenge(header)));
            let c = client(Some("pw"), &transport);
            let err = c.send("Shelly.GetDeviceInfo", json!({})).unwrap_err();
            assert_eq!(err.status(), Some(401));
            assert_eq!(transport.calls().len(), 1, "{header}");
        }

        let transport = Arc::new(FakeTransport::new(|_| reply(401, json!({}))));
        let c = client(Some("pw"), &transport);
        assert_eq!(c.send("Sys.GetStatus", json!({})).unwrap_err().status(), Some(401));
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn challenge_without_credentials_is_not_answered() {
        let transport = Arc::new(FakeTransport::new(|_| challenge(CHALLENGE)));
        let c = client(None, &transport);
        assert_eq!(c.send("Sys.GetStatus", json!({})).unwrap_err().kind(), ErrorKind::Authentication);
        assert_eq!(transport.calls().len(), 1);
    }

    #[test]
    fn application_errors_carry_code_and_method() {
        let transport = Arc::new(FakeTransport::new(|call| rpc_error(call, 404, "No handler for Schedule.List")));
        let c = client(None, &transport);
        let err = c.send("Schedule.List", json!({})).unwrap_err();
        assert_eq!(
            err,
            RpcError::Application {
                method: "Schedule.List".into(),
                code: 404,
                message: "No handler for Schedule.List".into()
            }
        );
        assert_eq!(err.kind(), ErrorKind::UnsupportedMethod);
    }

    #[test]
    fn transport_failures() {
        let transport = Arc::new(FakeTransport::new(|_| Err("timed out".to_string())));
        let err = client(None, &transport).send("Sys.GetStatus", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.status(), None);

        let transport = Arc::new(FakeTransport::new(|_| reply(500, json!("oops"))));
        let err = client(None, &transport).send("Sys.GetStatus", json!({})).unwrap_err();
        assert_eq!((err.kind(), err.status()), (ErrorKind::Transport, Some(500)));

        let transport = Arc::new(FakeTransport::new(|_| {
            Ok(HttpReply {
                status: 200,
                www_authenticate: None,
                body: r#"{"id": "x"}"#.into(),
            })
        }));
        let err = client(None, &transport).send("Sys.GetStatus", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.message().contains("id"), "{}", err.message());
    }

    #[test]
    fn request_path_keeps_base_path() {
        assert_eq!(request_path("http://10.0.0.9/rpc"), "/rpc");
        assert_eq!(request_path("https://gw.local/proxy/rpc"), "/proxy/rpc");
        assert_eq!(request_path("http://gw.local"), "/");
    }
}

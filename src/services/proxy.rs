//! Request handlers for the UI/API layer.
//!
//! Transport-agnostic: each handler takes already-decoded JSON and returns the
//! JSON body to send back. Every RPC goes through the allow-list.

use log::warn;
use serde_json::{Map, Value, json};
use std::path::Path;

use crate::error::RpcError;
use crate::guard::{ALLOWED_METHODS, GuardedClient};
use crate::models::rpc::ProxyCall;
use crate::services::layout;

/// `{method, params}` in, `{result}` or `{error}` out.
pub fn handle_rpc(client: &GuardedClient, body: Value) -> Value {
    let call: ProxyCall = match serde_json::from_value(body) {
        Ok(c) => c,
        Err(e) => {
            warn!("Rejected malformed proxy request: {}", e);
            return json!({"error": {"message": format!("invalid request: {}", e)}});
        }
    };

    let params = call.params.unwrap_or_else(|| json!({}));
    match client.call(&call.method, params) {
        Ok(result) => json!({ "result": result }),
        Err(e) => {
            e.log();
            json!({ "error": error_body(&e) })
        }
    }
}

fn error_body(e: &RpcError) -> Value {
    let mut body = Map::new();
    body.insert("message".into(), json!(e.message()));
    body.insert("method".into(), json!(e.method()));
    if let Some(code) = e.code() {
        body.insert("code".into(), json!(code));
    }
    if let Some(status) = e.status() {
        body.insert("status".into(), json!(status));
    }
    Value::Object(body)
}

pub fn list_methods() -> Value {
    json!({ "methods": ALLOWED_METHODS })
}

/// `{added}` or `{error}` for the panel-ensure operation on one dashboard.
pub fn ensure_dashboard(layout_dir: &Path, dashboard_id: &str) -> Value {
    match layout::ensure_dashboard(layout_dir, dashboard_id) {
        Ok(added) => json!({ "added": added }),
        Err(e) => {
            warn!("Panel ensure failed for dashboard {}: {}", dashboard_id, e);
            json!({ "error": { "message": e } })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use crate::client::testing::{FakeTransport, reply, result, rpc_error};
    use crate::config::ConnectionOptions;
    use std::sync::Arc;

    fn guarded(transport: &Arc<FakeTransport>) -> GuardedClient {
        GuardedClient::new(RpcClient::with_transport(ConnectionOptions::new(None), transport.clone()))
    }

    #[test]
    fn forwards_allowed_calls() {
        let transport = Arc::new(FakeTransport::new(|call| result(call, call.body["params"].clone())));
        let client = guarded(&transport);

        let out = handle_rpc(&client, json!({"method": "Script.Start", "params": {"id": 1}}));
        assert_eq!(out, json!({"result": {"id": 1}}));

        let out = handle_rpc(&client, json!({"method": "Sys.GetStatus"}));
        assert_eq!(out, json!({"result": {}}));
    }

    #[test]
    fn reports_errors_with_structure() {
        let transport = Arc::new(FakeTransport::new(|call| match call.method() {
            "Script.Stop" => rpc_error(call, -103, "Invalid argument 'id'"),
            _ => reply(401, json!({})),
        }));
        let client = guarded(&transport);

        let out = handle_rpc(&client, json!({"method": "Script.Stop", "params": {}}));
        assert_eq!(
            out,
            json!({"error": {"message": "Invalid argument 'id'", "method": "Script.Stop", "code": -103}})
        );

        let out = handle_rpc(&client, json!({"method": "Sys.GetStatus"}));
        assert_eq!(out["error"]["status"], json!(401));
    }

    #[test]
    fn refuses_disallowed_and_malformed_requests() {
        let transport = Arc::new(FakeTransport::new(|call| result(call, Value::Null)));
        let client = guarded(&transport);

        let out = handle_rpc(&client, json!({"method": "Sys.Reboot"}));
        assert_eq!(out["error"]["message"], json!("method Sys.Reboot is not allowed"));
        assert!(handle_rpc(&client, json!({"params": {}}))["error"].is_object());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn lists_methods() {
        let out = list_methods();
        let methods = out["methods"].as_array().unwrap();
        assert_eq!(methods.len(), ALLOWED_METHODS.len());
        assert!(methods.contains(&json!("Shelly.GetDeviceInfo")));
    }

    #[test]
    fn ensure_reports_errors_as_json() {
        let out = ensure_dashboard(Path::new("/nonexistent"), "a/b");
        assert!(out["error"]["message"].as_str().unwrap().contains("invalid dashboard id"));
    }
}

//! Wire envelopes for the controller's JSON-RPC style endpoint (`POST {host}/rpc`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Body of any 2xx reply. Exactly one of `result` / `error` is expected, but
/// neither is required by the decoder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Body accepted by the proxy handler: a method name plus optional params.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProxyCall {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_envelope_shape() {
        let req = RpcRequest {
            id: 7,
            method: "Shelly.GetDeviceInfo".into(),
            params: json!({}),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"id": 7, "method": "Shelly.GetDeviceInfo", "params": {}})
        );
    }

    #[test]
    fn error_reply_without_message() {
        let resp: RpcResponse = serde_json::from_value(json!({"id": 3, "error": {"code": 404}})).unwrap();
        assert_eq!(resp.result, None);
        assert_eq!(
            resp.error,
            Some(RpcErrorBody {
                code: 404,
                message: String::new()
            })
        );
    }
}

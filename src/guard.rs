//! Method allow-list in front of the RPC client.
//!
//! The proxy handler is reachable from a browser on the local network, so
//! only the methods below may ever reach the controller. The list is a
//! compiled constant; widening it is a code change.

use serde_json::Value;

use crate::client::RpcClient;
use crate::error::RpcError;

pub const ALLOWED_METHODS: &[&str] = &[
    "Shelly.GetDeviceInfo",
    "Shelly.GetStatus",
    "Shelly.GetConfig",
    "Shelly.GetComponents",
    "Shelly.ListMethods",
    "Sys.GetStatus",
    "BluTrv.GetStatus",
    "BluTrv.GetConfig",
    "BluTrv.GetRemoteStatus",
    "Script.List",
    "Script.GetStatus",
    "Script.Start",
    "Script.Stop",
    "Schedule.List",
    "Webhook.List",
];

pub fn is_allowed(method: &str) -> bool {
    ALLOWED_METHODS.contains(&method)
}

/// Fails fast for anything outside [`ALLOWED_METHODS`].
pub fn guard(method: &str) -> Result<(), RpcError> {
    if is_allowed(method) {
        Ok(())
    } else {
        Err(RpcError::NotAllowed {
            method: method.to_string(),
        })
    }
}

/// The only way the rest of the crate talks to the controller.
pub struct GuardedClient {
    inner: RpcClient,
}

impl GuardedClient {
    pub fn new(inner: RpcClient) -> Self {
        GuardedClient { inner }
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        guard(method)?;
        self.inner.send(method, params)
    }

    pub fn host(&self) -> &str {
        &self.inner.options().host
    }
}

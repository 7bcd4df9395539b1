//! Typed outbound calls.
//!
//! Serializes a `rust-ocpp` request into the CALL payload, issues it through
//! the RPC client and deserializes the CALLRESULT payload into the typed
//! response.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use crate::rpc::RpcClient;
use crate::support::errors::RpcError;

#[derive(Clone)]
pub struct MessageSender {
    rpc: Arc<RpcClient>,
}

impl MessageSender {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }

    /// Send `request` as `action` and wait for the typed response.
    pub async fn call<Req, Resp>(&self, action: &str, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_value(request).map_err(|e| RpcError::InvalidPayload(e.to_string()))?;
        let result = self.rpc.call(action, payload).await?;
        serde_json::from_value(result).map_err(|e| RpcError::InvalidPayload(e.to_string()))
    }

    /// Same as [`call`](Self::call) with an explicit timeout.
    pub async fn call_with_timeout<Req, Resp>(
        &self,
        action: &str,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload =
            serde_json::to_value(request).map_err(|e| RpcError::InvalidPayload(e.to_string()))?;
        let result = self.rpc.call_with_timeout(action, payload, timeout).await?;
        serde_json::from_value(result).map_err(|e| RpcError::InvalidPayload(e.to_string()))
    }

    /// Send an already-serialized payload (used by the FIFO driver, which
    /// stores requests as JSON documents).
    pub async fn call_raw(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        self.rpc.call(action, payload).await
    }

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.rpc.connection_watch()
    }
}

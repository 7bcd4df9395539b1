//! Inbound CALL dispatch.
//!
//! Maps OCPP action names to typed handlers. Each component registers one
//! handler per action it owns at construction time; registering the same
//! action twice is a wiring bug and fails loudly. Payloads are deserialized
//! before the handler runs, so a schema violation never touches component
//! state and is answered with a CALLERROR straight from the dispatcher.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::rpc::frame::RpcErrorCode;
use crate::support::errors::{StationError, StationResult};

/// A structured error returned by a handler, mapped to a CALLERROR frame.
#[derive(Debug, Clone)]
pub struct CallFault {
    pub code: RpcErrorCode,
    pub description: String,
}

impl CallFault {
    pub fn new(code: RpcErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, description)
    }

    pub fn property_constraint(description: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PropertyConstraintViolation, description)
    }
}

/// An inbound CALL handler bound to a single action.
#[async_trait]
pub trait CallHandler: Send + Sync {
    async fn handle(&self, payload: Value) -> Result<Value, CallFault>;
}

/// Action-name → handler registry.
pub struct MessageDispatcher {
    handlers: DashMap<String, Arc<dyn CallHandler>>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a raw handler for `action`.
    pub fn register(&self, action: &str, handler: Arc<dyn CallHandler>) -> StationResult<()> {
        if self.handlers.contains_key(action) {
            return Err(StationError::DuplicateHandler(action.to_string()));
        }
        debug!(action, "Handler registered");
        self.handlers.insert(action.to_string(), handler);
        Ok(())
    }

    /// Register a typed handler: the payload is deserialized into `Req` and
    /// the `Resp` return value serialized into the CALLRESULT payload.
    pub fn register_typed<Req, Resp, F, Fut>(&self, action: &str, handler: F) -> StationResult<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, CallFault>> + Send + 'static,
    {
        self.register(
            action,
            Arc::new(TypedHandler {
                action: action.to_string(),
                handler,
                _marker: PhantomData,
            }),
        )
    }

    /// Dispatch an inbound CALL. Unknown actions answer `NotImplemented`.
    pub async fn dispatch(&self, action: &str, payload: Value) -> Result<Value, CallFault> {
        let handler = match self.handlers.get(action) {
            Some(entry) => entry.value().clone(),
            None => {
                warn!(action, "No handler for inbound call");
                return Err(CallFault::new(
                    RpcErrorCode::NotImplemented,
                    format!("Action '{}' is not implemented", action),
                ));
            }
        };
        handler.handle(payload).await
    }

    pub fn has_handler(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

struct TypedHandler<Req, Resp, F> {
    action: String,
    handler: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

#[async_trait]
impl<Req, Resp, F, Fut> CallHandler for TypedHandler<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, CallFault>> + Send + 'static,
{
    async fn handle(&self, payload: Value) -> Result<Value, CallFault> {
        let request: Req = serde_json::from_value(payload).map_err(|e| {
            warn!(action = self.action.as_str(), error = %e, "Malformed payload");
            CallFault::new(
                RpcErrorCode::FormationViolation,
                format!("Malformed {} payload: {}", self.action, e),
            )
        })?;

        let response = (self.handler)(request).await?;

        serde_json::to_value(&response).map_err(|e| CallFault::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct EchoReq {
        text: String,
    }

    #[derive(Serialize)]
    struct EchoResp {
        text: String,
    }

    fn echo_dispatcher() -> MessageDispatcher {
        let dispatcher = MessageDispatcher::new();
        dispatcher
            .register_typed("Echo", |req: EchoReq| async move {
                Ok(EchoResp { text: req.text })
            })
            .unwrap();
        dispatcher
    }

    #[tokio::test]
    async fn dispatches_to_typed_handler() {
        let dispatcher = echo_dispatcher();
        let result = dispatcher
            .dispatch("Echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[tokio::test]
    async fn unknown_action_is_not_implemented() {
        let dispatcher = echo_dispatcher();
        let fault = dispatcher
            .dispatch("NoSuchAction", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcErrorCode::NotImplemented);
    }

    #[tokio::test]
    async fn malformed_payload_is_formation_violation() {
        let dispatcher = echo_dispatcher();
        let fault = dispatcher
            .dispatch("Echo", serde_json::json!({"wrong": 1}))
            .await
            .unwrap_err();
        assert_eq!(fault.code, RpcErrorCode::FormationViolation);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let dispatcher = echo_dispatcher();
        let result = dispatcher.register_typed("Echo", |req: EchoReq| async move {
            Ok(EchoResp { text: req.text })
        });
        assert!(matches!(result, Err(StationError::DuplicateHandler(_))));
    }
}

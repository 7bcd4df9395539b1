//! TriggerMessage dispatch.
//!
//! The Central System may ask the station to emit a specific message. Each
//! component that owns such a message registers a handler; the handler
//! decides Accepted/Rejected and may send the actual message asynchronously
//! after the response goes out.

use std::sync::Arc;

use async_trait::async_trait;
use rust_ocpp::v1_6::messages::trigger_message::{TriggerMessageRequest, TriggerMessageResponse};
use rust_ocpp::v1_6::types::{MessageTrigger, TriggerMessageStatus};
use tracing::{info, warn};

use crate::chargepoint::connectors::Connectors;
use crate::messages::dispatcher::CallFault;
use crate::messages::MessageDispatcher;
use crate::support::errors::StationResult;

#[async_trait]
pub trait TriggerHandler: Send + Sync {
    /// Handle a trigger for the owned message. Returning `true` answers
    /// `Accepted`; the actual message may follow asynchronously.
    async fn on_trigger(&self, trigger: MessageTrigger, connector_id: Option<u32>) -> bool;
}

pub struct TriggerMessageManager {
    connectors: Arc<Connectors>,
    handlers: std::sync::RwLock<Vec<(MessageTrigger, Arc<dyn TriggerHandler>)>>,
}

impl TriggerMessageManager {
    pub fn new(connectors: Arc<Connectors>) -> Arc<Self> {
        Arc::new(Self {
            connectors,
            handlers: std::sync::RwLock::new(Vec::new()),
        })
    }

    /// Bind `handler` to `trigger`, replacing a previous binding.
    pub fn register(&self, trigger: MessageTrigger, handler: Arc<dyn TriggerHandler>) {
        let mut handlers = self.handlers.write().unwrap();
        handlers.retain(|(t, _)| *t != trigger);
        handlers.push((trigger, handler));
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let manager = self.clone();
        dispatcher.register_typed("TriggerMessage", move |request: TriggerMessageRequest| {
            let manager = manager.clone();
            async move { manager.handle_trigger_message(request).await }
        })
    }

    async fn handle_trigger_message(
        &self,
        request: TriggerMessageRequest,
    ) -> Result<TriggerMessageResponse, CallFault> {
        info!(
            requested = ?request.requested_message,
            connector_id = ?request.connector_id,
            "TriggerMessage"
        );

        let handler = {
            let handlers = self.handlers.read().unwrap();
            handlers
                .iter()
                .find(|(t, _)| *t == request.requested_message)
                .map(|(_, h)| h.clone())
        };

        let Some(handler) = handler else {
            warn!(requested = ?request.requested_message, "Trigger not implemented");
            return Ok(TriggerMessageResponse {
                status: TriggerMessageStatus::NotImplemented,
            });
        };

        // A connector id, when supplied, must address a physical connector.
        if let Some(connector_id) = request.connector_id {
            if !self.connectors.is_chargeable(connector_id) {
                return Err(CallFault::property_constraint(format!(
                    "Invalid connector id {}",
                    connector_id
                )));
            }
        }

        let accepted = handler
            .on_trigger(request.requested_message, request.connector_id)
            .await;
        let status = if accepted {
            TriggerMessageStatus::Accepted
        } else {
            TriggerMessageStatus::Rejected
        };
        info!(?status, "TriggerMessage handled");
        Ok(TriggerMessageResponse { status })
    }
}

/// Adapter so plain closures can serve fixed-verdict triggers.
pub struct FnTrigger<F>(pub F);

#[async_trait]
impl<F> TriggerHandler for FnTrigger<F>
where
    F: Fn(MessageTrigger, Option<u32>) -> bool + Send + Sync,
{
    async fn on_trigger(&self, trigger: MessageTrigger, connector_id: Option<u32>) -> bool {
        (self.0)(trigger, connector_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Recording {
        called: AtomicBool,
        accept: bool,
    }

    #[async_trait]
    impl TriggerHandler for Recording {
        async fn on_trigger(&self, _trigger: MessageTrigger, _connector_id: Option<u32>) -> bool {
            self.called.store(true, Ordering::SeqCst);
            self.accept
        }
    }

    fn manager_with(
        trigger: MessageTrigger,
        accept: bool,
    ) -> (Arc<TriggerMessageManager>, Arc<Recording>) {
        let manager = TriggerMessageManager::new(Arc::new(Connectors::new(2)));
        let handler = Arc::new(Recording {
            called: AtomicBool::new(false),
            accept,
        });
        manager.register(trigger, handler.clone());
        (manager, handler)
    }

    #[tokio::test]
    async fn unhandled_trigger_is_not_implemented() {
        let manager = TriggerMessageManager::new(Arc::new(Connectors::new(2)));
        let response = manager
            .handle_trigger_message(TriggerMessageRequest {
                requested_message: MessageTrigger::Heartbeat,
                connector_id: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, TriggerMessageStatus::NotImplemented);
    }

    #[tokio::test]
    async fn invalid_connector_is_property_violation() {
        let (manager, handler) = manager_with(MessageTrigger::MeterValues, true);
        let fault = manager
            .handle_trigger_message(TriggerMessageRequest {
                requested_message: MessageTrigger::MeterValues,
                connector_id: Some(99),
            })
            .await
            .unwrap_err();
        assert_eq!(
            fault.code,
            crate::rpc::frame::RpcErrorCode::PropertyConstraintViolation
        );
        assert!(!handler.called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn accepted_and_rejected_verdicts() {
        let (manager, handler) = manager_with(MessageTrigger::StatusNotification, true);
        let response = manager
            .handle_trigger_message(TriggerMessageRequest {
                requested_message: MessageTrigger::StatusNotification,
                connector_id: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(response.status, TriggerMessageStatus::Accepted);
        assert!(handler.called.load(Ordering::SeqCst));

        let (manager, _) = manager_with(MessageTrigger::Heartbeat, false);
        let response = manager
            .handle_trigger_message(TriggerMessageRequest {
                requested_message: MessageTrigger::Heartbeat,
                connector_id: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, TriggerMessageStatus::Rejected);
    }

    #[tokio::test]
    async fn re_registration_replaces_handler() {
        let (manager, _) = manager_with(MessageTrigger::Heartbeat, false);
        manager.register(
            MessageTrigger::Heartbeat,
            Arc::new(FnTrigger(|_: MessageTrigger, _: Option<u32>| true)),
        );
        let response = manager
            .handle_trigger_message(TriggerMessageRequest {
                requested_message: MessageTrigger::Heartbeat,
                connector_id: None,
            })
            .await
            .unwrap();
        assert_eq!(response.status, TriggerMessageStatus::Accepted);
    }
}

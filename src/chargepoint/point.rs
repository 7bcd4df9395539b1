//! Charge point facade.
//!
//! Builds every component against one database and one dispatcher, registers
//! all inbound handlers and trigger bindings, and exposes the local API the
//! embedding station calls: hardware events (plug in/out, faults), swipe
//! start/stop, and the current smart-charging setpoint.

use std::sync::Arc;
use std::time::Duration;

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::reset::{ResetRequest, ResetResponse};
use rust_ocpp::v1_6::messages::unlock_connector::{
    UnlockConnectorRequest, UnlockConnectorResponse,
};
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, ChargePointStatus, ChargingRateUnitType, MessageTrigger, Reason,
    ResetResponseStatus, UnlockStatus,
};
use tracing::{info, warn};

use crate::chargepoint::authent::{AuthentCache, AuthentLocalList, AuthentManager};
use crate::chargepoint::connectors::Connectors;
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::metervalues::{MeterValuesManager, MeterValuesTrigger};
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::chargepoint::reservation::ReservationManager;
use crate::chargepoint::smartcharging::{Setpoint, SmartChargingManager};
use crate::chargepoint::status::StatusManager;
use crate::chargepoint::transaction::{RequestFifo, TransactionManager};
use crate::chargepoint::trigger::{FnTrigger, TriggerMessageManager};
use crate::config::StackConfig;
use crate::infrastructure::database::{init_database, Repositories};
use crate::messages::{MessageDispatcher, MessageSender};
use crate::rpc::{RpcClient, RpcClientConfig};
use crate::support::errors::StationResult;
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::TimerHandle;

pub struct ChargePoint {
    connectors: Arc<Connectors>,
    ocpp_config: Arc<OcppConfig>,
    rpc: Arc<RpcClient>,
    sender: MessageSender,
    fifo: Arc<RequestFifo>,
    smart_charging: Arc<SmartChargingManager>,
    status: Arc<StatusManager>,
    meter_values: Arc<MeterValuesManager>,
    transactions: Arc<TransactionManager>,
    shutdown: ShutdownSignal,
    cleanup_timer: std::sync::Mutex<Option<TimerHandle>>,
}

impl ChargePoint {
    /// Build the full stack. Nothing runs until [`start`](Self::start).
    pub async fn new(
        config: StackConfig,
        events: Arc<dyn ChargePointEventsHandler>,
    ) -> StationResult<Arc<Self>> {
        config
            .validate()
            .map_err(crate::support::errors::StationError::Config)?;

        let db = init_database(&config.database.connection_url()).await?;
        let repos = Repositories::new(db);

        let connectors = Arc::new(Connectors::new(config.station.connector_count));
        let ocpp_config =
            OcppConfig::load(repos.internal_config.clone(), config.station.connector_count).await?;

        let dispatcher = Arc::new(MessageDispatcher::new());
        let shutdown = ShutdownSignal::new();

        let rpc = RpcClient::new(
            RpcClientConfig {
                central_system_url: config.central_system.url.clone(),
                chargepoint_id: config.station.chargepoint_id.clone(),
                basic_auth: config
                    .central_system
                    .credentials(&config.station.chargepoint_id),
                ping_interval: config.central_system.ping_interval(),
                call_timeout: config.central_system.call_timeout(),
                reconnect_backoff_min: Duration::from_secs(
                    config.central_system.reconnect_backoff_min_secs,
                ),
                reconnect_backoff_max: Duration::from_secs(
                    config.central_system.reconnect_backoff_max_secs,
                ),
            },
            dispatcher.clone(),
            shutdown.clone(),
        );
        let sender = MessageSender::new(rpc.clone());

        let cache = AuthentCache::init(
            repos.auth_cache.clone(),
            ocpp_config.clone(),
            config.authent.cache_max_entries,
        )
        .await?;
        let local_list = AuthentLocalList::init(
            repos.auth_local_list.clone(),
            repos.internal_config.clone(),
            ocpp_config.clone(),
        )
        .await?;
        let authent = AuthentManager::new(
            local_list.clone(),
            cache.clone(),
            ocpp_config.clone(),
            sender.clone(),
        );

        let fifo = Arc::new(RequestFifo::load(repos.request_fifo.clone()).await?);
        let smart_charging = SmartChargingManager::init(
            &config.smart_charging,
            connectors.clone(),
            repos.charging_profiles.clone(),
        )
        .await?;

        let status = StatusManager::init(
            config.station.clone(),
            &config.central_system,
            ocpp_config.clone(),
            connectors.clone(),
            sender.clone(),
            events.clone(),
            repos.internal_config.clone(),
            shutdown.clone(),
        )
        .await?;

        let meter_values = MeterValuesManager::new(
            connectors.clone(),
            fifo.clone(),
            sender.clone(),
            events.clone(),
            ocpp_config.clone(),
            shutdown.clone(),
        );

        let transactions = TransactionManager::new(
            connectors.clone(),
            fifo.clone(),
            sender.clone(),
            authent.clone(),
            smart_charging.clone(),
            status.clone(),
            meter_values.clone(),
            events.clone(),
            ocpp_config.clone(),
            shutdown.clone(),
        );

        let reservations = ReservationManager::new(
            connectors.clone(),
            status.clone(),
            ocpp_config.clone(),
            shutdown.clone(),
        );

        let trigger = TriggerMessageManager::new(connectors.clone());

        // ── Inbound handlers, one registration per action ──
        ocpp_config.register_handlers(&dispatcher)?;
        cache.register_handlers(&dispatcher)?;
        local_list.register_handlers(&dispatcher)?;
        smart_charging.register_handlers(&dispatcher)?;
        status.register_handlers(&dispatcher)?;
        transactions.register_handlers(&dispatcher)?;
        reservations.register_handlers(&dispatcher)?;
        trigger.register_handlers(&dispatcher)?;
        register_core_handlers(&dispatcher, events.clone(), connectors.clone())?;

        // ── Trigger bindings ───────────────────────────────
        trigger.register(MessageTrigger::BootNotification, status.clone());
        trigger.register(MessageTrigger::Heartbeat, status.clone());
        trigger.register(MessageTrigger::StatusNotification, status.clone());
        trigger.register(
            MessageTrigger::MeterValues,
            Arc::new(MeterValuesTrigger(meter_values.clone())),
        );
        // No diagnostics or firmware pipeline in this stack.
        trigger.register(
            MessageTrigger::DiagnosticsStatusNotification,
            Arc::new(FnTrigger(|_: MessageTrigger, _: Option<u32>| false)),
        );
        trigger.register(
            MessageTrigger::FirmwareStatusNotification,
            Arc::new(FnTrigger(|_: MessageTrigger, _: Option<u32>| false)),
        );

        info!(
            chargepoint_id = config.station.chargepoint_id.as_str(),
            connectors = config.station.connector_count,
            "Charge point stack assembled"
        );

        Ok(Arc::new(Self {
            connectors,
            ocpp_config,
            rpc,
            sender,
            fifo,
            smart_charging,
            status,
            meter_values,
            transactions,
            shutdown,
            cleanup_timer: std::sync::Mutex::new(None),
        }))
    }

    /// Connect and run. Returns immediately; all work happens on spawned
    /// tasks until [`stop`](Self::stop).
    pub fn start(self: &Arc<Self>) {
        self.status.start();
        self.transactions.start();
        self.meter_values.start();
        let cleanup = self.smart_charging.start(self.shutdown.clone());
        *self.cleanup_timer.lock().unwrap() = Some(cleanup);
        self.rpc.start();
        info!("Charge point started");
    }

    /// Trigger shutdown: pending callbacks drain, in-flight calls fail with
    /// a transport error, the socket closes.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    // ── Local API for the embedding station ────────────────

    pub fn is_connected(&self) -> bool {
        self.rpc.is_connected()
    }

    pub fn is_registered(&self) -> bool {
        self.status.is_registered()
    }

    pub fn ocpp_config(&self) -> &Arc<OcppConfig> {
        &self.ocpp_config
    }

    /// Swipe: authorize locally/centrally and start a transaction.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> StationResult<AuthorizationStatus> {
        self.transactions.start_transaction(connector_id, id_tag).await
    }

    /// Swipe to stop (or local stop button).
    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        id_tag: Option<&str>,
    ) -> StationResult<bool> {
        self.transactions
            .stop_transaction(connector_id, id_tag, Reason::Local)
            .await
    }

    /// A cable was plugged in.
    pub async fn plug_in(&self, connector_id: u32) {
        if let Some(connector) = self.connectors.get(connector_id) {
            let status = connector.lock().await.status.clone();
            if status == ChargePointStatus::Available {
                self.status
                    .update_connector_status(connector_id, ChargePointStatus::Preparing)
                    .await;
            }
        }
    }

    /// The cable was removed. A running transaction ends with
    /// `EVDisconnected`.
    pub async fn plug_out(&self, connector_id: u32) {
        let Some(connector) = self.connectors.get(connector_id) else {
            return;
        };
        let active = connector.lock().await.transaction_active;
        if active {
            if let Err(e) = self
                .transactions
                .stop_transaction(connector_id, None, Reason::EVDisconnected)
                .await
            {
                warn!(connector_id, error = %e, "Stop on unplug failed");
            }
        }

        // Only cable-bound states fall back to Available; a Reserved or
        // Unavailable connector keeps its state.
        let status = connector.lock().await.status.clone();
        if matches!(
            status,
            ChargePointStatus::Preparing
                | ChargePointStatus::Charging
                | ChargePointStatus::SuspendedEV
                | ChargePointStatus::SuspendedEVSE
                | ChargePointStatus::Finishing
        ) {
            self.status
                .update_connector_status(connector_id, ChargePointStatus::Available)
                .await;
        }
    }

    /// Hardware fault raised or cleared.
    pub async fn set_faulted(&self, connector_id: u32, faulted: bool) {
        let status = if faulted {
            ChargePointStatus::Faulted
        } else {
            ChargePointStatus::Available
        };
        self.status.update_connector_status(connector_id, status).await;
    }

    /// Charging suspended by the vehicle or the station.
    pub async fn set_suspended(&self, connector_id: u32, by_vehicle: bool) {
        let status = if by_vehicle {
            ChargePointStatus::SuspendedEV
        } else {
            ChargePointStatus::SuspendedEVSE
        };
        self.status.update_connector_status(connector_id, status).await;
    }

    pub async fn connector_status(&self, connector_id: u32) -> Option<ChargePointStatus> {
        match self.connectors.get(connector_id) {
            Some(connector) => Some(connector.lock().await.status.clone()),
            None => None,
        }
    }

    pub async fn current_transaction_id(&self, connector_id: u32) -> Option<i32> {
        match self.connectors.get(connector_id) {
            Some(connector) => connector.lock().await.transaction_id,
            None => None,
        }
    }

    /// Transaction-related requests still waiting for acknowledgement.
    pub async fn pending_transaction_messages(&self) -> usize {
        self.fifo.size().await
    }

    /// Smart-charging setpoints (charge point cap, connector limit) in
    /// effect right now.
    pub async fn get_setpoint(
        &self,
        connector_id: u32,
        unit: ChargingRateUnitType,
    ) -> (Option<Setpoint>, Option<Setpoint>) {
        self.smart_charging.get_setpoint(connector_id, unit).await
    }

    /// Typed access to the outbound sender, for vendor DataTransfer calls.
    pub fn sender(&self) -> &MessageSender {
        &self.sender
    }
}

/// Reset, UnlockConnector and DataTransfer: thin handlers that delegate to
/// the events handler and return its verdict verbatim. Whether (and when) a
/// reset or an unlock interrupts a running session is the embedding
/// station's decision.
fn register_core_handlers(
    dispatcher: &MessageDispatcher,
    events: Arc<dyn ChargePointEventsHandler>,
    connectors: Arc<Connectors>,
) -> StationResult<()> {
    let handler_events = events.clone();
    dispatcher.register_typed("Reset", move |request: ResetRequest| {
        let events = handler_events.clone();
        async move {
            info!(kind = ?request.kind, "Reset");
            let status = if events.reset_requested(request.kind).await {
                ResetResponseStatus::Accepted
            } else {
                ResetResponseStatus::Rejected
            };
            info!(?status, "Reset answered");
            Ok(ResetResponse { status })
        }
    })?;

    let handler_events = events.clone();
    dispatcher.register_typed(
        "UnlockConnector",
        move |request: UnlockConnectorRequest| {
            let events = handler_events.clone();
            let connectors = connectors.clone();
            async move {
                let connector_id = request.connector_id;
                info!(connector_id, "UnlockConnector");
                // An unknown connector id answers NotSupported, not an error.
                let status = if connectors.is_chargeable(connector_id) {
                    events.unlock_connector_requested(connector_id).await
                } else {
                    warn!(connector_id, "UnlockConnector on unknown connector");
                    UnlockStatus::NotSupported
                };
                Ok(UnlockConnectorResponse { status })
            }
        },
    )?;

    dispatcher.register_typed("DataTransfer", move |request: DataTransferRequest| {
        let events = events.clone();
        async move {
            let (status, data) = events
                .data_transfer_requested(
                    &request.vendor_string,
                    request.message_id.as_deref(),
                    request.data.as_deref(),
                )
                .await;
            Ok(DataTransferResponse { status, data })
        }
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_ocpp::v1_6::types::{Measurand, MeterValue, ResetRequestStatus};
    use serde_json::json;

    struct StubEvents {
        accept_reset: bool,
        unlock_status: UnlockStatus,
    }

    #[async_trait]
    impl ChargePointEventsHandler for StubEvents {
        async fn get_meter_value(
            &self,
            _connector_id: u32,
            _measurand: &Measurand,
        ) -> Option<MeterValue> {
            None
        }

        async fn get_tx_start_stop_meter_value(&self, _connector_id: u32) -> i32 {
            0
        }

        async fn reset_requested(&self, _kind: ResetRequestStatus) -> bool {
            self.accept_reset
        }

        async fn unlock_connector_requested(&self, _connector_id: u32) -> UnlockStatus {
            self.unlock_status.clone()
        }
    }

    fn core_dispatcher(events: StubEvents) -> MessageDispatcher {
        let dispatcher = MessageDispatcher::new();
        register_core_handlers(&dispatcher, Arc::new(events), Arc::new(Connectors::new(2)))
            .unwrap();
        dispatcher
    }

    #[tokio::test]
    async fn reset_returns_the_events_handler_verdict() {
        let dispatcher = core_dispatcher(StubEvents {
            accept_reset: true,
            unlock_status: UnlockStatus::Unlocked,
        });
        let result = dispatcher
            .dispatch("Reset", json!({ "type": "Soft" }))
            .await
            .unwrap();
        assert_eq!(result["status"], "Accepted");

        let dispatcher = core_dispatcher(StubEvents {
            accept_reset: false,
            unlock_status: UnlockStatus::Unlocked,
        });
        let result = dispatcher
            .dispatch("Reset", json!({ "type": "Hard" }))
            .await
            .unwrap();
        assert_eq!(result["status"], "Rejected");
    }

    #[tokio::test]
    async fn unlock_delegates_and_reports_unknown_connector() {
        let dispatcher = core_dispatcher(StubEvents {
            accept_reset: true,
            unlock_status: UnlockStatus::Unlocked,
        });
        let result = dispatcher
            .dispatch("UnlockConnector", json!({ "connectorId": 1 }))
            .await
            .unwrap();
        assert_eq!(result["status"], "Unlocked");

        let result = dispatcher
            .dispatch("UnlockConnector", json!({ "connectorId": 99 }))
            .await
            .unwrap();
        assert_eq!(result["status"], "NotSupported");
    }

    #[tokio::test]
    async fn data_transfer_defaults_to_unknown_vendor() {
        let dispatcher = core_dispatcher(StubEvents {
            accept_reset: true,
            unlock_status: UnlockStatus::Unlocked,
        });
        let result = dispatcher
            .dispatch(
                "DataTransfer",
                json!({ "vendorId": "com.example", "messageId": "Ping" }),
            )
            .await
            .unwrap();
        assert_eq!(result["status"], "UnknownVendorId");
        assert!(result["data"].is_null());
    }
}

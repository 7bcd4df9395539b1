//! Registration, heartbeat and connector status reporting.
//!
//! Drives the BootNotification cycle after every (re)connect, runs the
//! heartbeat at the negotiated interval, and emits a StatusNotification on
//! every connector state change. Status notifications are best-effort: they
//! are never queued through the transaction FIFO, a lost one does not
//! compromise billing. All current statuses are re-sent once registration is
//! accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::change_availability::{
    ChangeAvailabilityRequest, ChangeAvailabilityResponse,
};
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::types::{
    AvailabilityStatus, AvailabilityType, ChargePointErrorCode, ChargePointStatus, MessageTrigger,
    RegistrationStatus,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chargepoint::connectors::Connectors;
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::chargepoint::trigger::TriggerHandler;
use crate::config::{CentralSystemConfig, StationConfig};
use crate::infrastructure::database::repositories::internal_config_repository::{
    CONNECTOR_AVAILABILITY_KEY_PREFIX, REGISTRATION_STATUS_KEY,
};
use crate::infrastructure::database::InternalConfigRepository;
use crate::messages::dispatcher::CallFault;
use crate::messages::{MessageDispatcher, MessageSender};
use crate::support::errors::StationResult;
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::{spawn_periodic, TimerHandle};

pub struct StatusManager {
    station: StationConfig,
    boot_retry: Duration,
    ocpp_config: Arc<OcppConfig>,
    connectors: Arc<Connectors>,
    sender: MessageSender,
    events: Arc<dyn ChargePointEventsHandler>,
    internal_config: InternalConfigRepository,
    registered_tx: watch::Sender<bool>,
    registered_rx: watch::Receiver<bool>,
    heartbeat: std::sync::Mutex<Option<TimerHandle>>,
    shutdown: ShutdownSignal,
}

impl StatusManager {
    /// Build the manager and restore persisted connector availability.
    pub async fn init(
        station: StationConfig,
        central_system: &CentralSystemConfig,
        ocpp_config: Arc<OcppConfig>,
        connectors: Arc<Connectors>,
        sender: MessageSender,
        events: Arc<dyn ChargePointEventsHandler>,
        internal_config: InternalConfigRepository,
        shutdown: ShutdownSignal,
    ) -> StationResult<Arc<Self>> {
        // An Inoperative connector stays Unavailable across restarts.
        for connector_id in connectors.ids() {
            let key = format!("{}{}", CONNECTOR_AVAILABILITY_KEY_PREFIX, connector_id);
            if internal_config.get(&key).await?.as_deref() == Some("Inoperative") {
                if let Some(connector) = connectors.get(connector_id) {
                    connector.lock().await.status = ChargePointStatus::Unavailable;
                    info!(connector_id, "Connector restored as Unavailable");
                }
            }
        }

        let (registered_tx, registered_rx) = watch::channel(false);
        Ok(Arc::new(Self {
            station,
            boot_retry: Duration::from_secs(central_system.boot_retry_interval_secs),
            ocpp_config,
            connectors,
            sender,
            events,
            internal_config,
            registered_tx,
            registered_rx,
            heartbeat: std::sync::Mutex::new(None),
            shutdown,
        }))
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let manager = self.clone();
        dispatcher.register_typed(
            "ChangeAvailability",
            move |request: ChangeAvailabilityRequest| {
                let manager = manager.clone();
                async move { manager.handle_change_availability(request).await }
            },
        )
    }

    /// Observe the registration state: `true` once BootNotification was
    /// accepted on the current connection.
    pub fn registration_watch(&self) -> watch::Receiver<bool> {
        self.registered_rx.clone()
    }

    pub fn is_registered(&self) -> bool {
        *self.registered_rx.borrow()
    }

    /// Spawn the connection supervisor: boot after every connect, tear the
    /// heartbeat down on every disconnect.
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut connection = manager.sender.connection_watch();
            loop {
                let connected = *connection.borrow();
                if connected {
                    manager.events.connection_state_changed(true).await;
                    manager.boot_until_accepted().await;
                } else {
                    manager.events.connection_state_changed(false).await;
                    let _ = manager.registered_tx.send(false);
                    manager.stop_heartbeat();
                }

                tokio::select! {
                    changed = connection.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = manager.shutdown.wait() => break,
                }
            }
        });
    }

    async fn boot_until_accepted(self: &Arc<Self>) {
        let request = BootNotificationRequest {
            charge_point_vendor: self.station.vendor.clone(),
            charge_point_model: self.station.model.clone(),
            charge_point_serial_number: self.station.serial_number.clone(),
            charge_box_serial_number: None,
            firmware_version: self.station.firmware_version.clone(),
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        };

        while !self.shutdown.is_triggered() && self.sender.is_connected() {
            let response: Result<BootNotificationResponse, _> =
                self.sender.call("BootNotification", &request).await;

            let retry_in = match response {
                Ok(response) => {
                    info!(status = ?response.status, interval = response.interval, "BootNotification answered");
                    let _ = self
                        .internal_config
                        .set(REGISTRATION_STATUS_KEY, &format!("{:?}", response.status))
                        .await;

                    match response.status {
                        RegistrationStatus::Accepted => {
                            let _ = self.registered_tx.send(true);
                            let interval = if response.interval > 0 {
                                response.interval as u64
                            } else {
                                self.ocpp_config.heartbeat_interval_secs()
                            };
                            self.start_heartbeat(interval);
                            self.send_all_status_notifications().await;
                            return;
                        }
                        // Pending/Rejected: try again after the interval the
                        // Central System asked for.
                        _ => {
                            if response.interval > 0 {
                                Duration::from_secs(response.interval as u64)
                            } else {
                                self.boot_retry
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "BootNotification failed");
                    self.boot_retry
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(retry_in) => {}
                _ = self.shutdown.wait() => return,
            }
        }
    }

    fn start_heartbeat(self: &Arc<Self>, interval_secs: u64) {
        let interval = Duration::from_secs(interval_secs.max(1));
        let manager = self.clone();
        let handle = spawn_periodic("heartbeat", interval, self.shutdown.clone(), move || {
            let manager = manager.clone();
            async move {
                manager.send_heartbeat().await;
            }
        });
        info!(interval_secs, "Heartbeat started");
        *self.heartbeat.lock().unwrap() = Some(handle);
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().unwrap().take() {
            handle.stop();
        }
    }

    async fn send_heartbeat(&self) {
        let result: Result<HeartbeatResponse, _> =
            self.sender.call("Heartbeat", &HeartbeatRequest {}).await;
        match result {
            Ok(response) => debug!(central_time = %response.current_time, "Heartbeat answered"),
            Err(e) => warn!(error = %e, "Heartbeat failed"),
        }
    }

    /// Transition a connector and report it.
    pub async fn update_connector_status(&self, connector_id: u32, status: ChargePointStatus) {
        let Some(connector) = self.connectors.get(connector_id) else {
            return;
        };

        {
            let mut state = connector.lock().await;
            if state.status == status {
                return;
            }
            info!(connector_id, from = ?state.status, to = ?status, "Connector status");
            state.status = status.clone();
        }

        self.events
            .connector_status_changed(connector_id, status.clone())
            .await;
        self.send_status_notification(connector_id, status).await;
    }

    async fn send_status_notification(&self, connector_id: u32, status: ChargePointStatus) {
        if !self.is_registered() {
            return;
        }
        let request = StatusNotificationRequest {
            connector_id,
            error_code: ChargePointErrorCode::NoError,
            info: None,
            status,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        };
        let result: Result<StatusNotificationResponse, _> =
            self.sender.call("StatusNotification", &request).await;
        if let Err(e) = result {
            // Status notifications are never retried through the FIFO.
            warn!(connector_id, error = %e, "StatusNotification failed");
        }
    }

    async fn send_all_status_notifications(&self) {
        for connector_id in 0..=self.connectors.count() {
            let Some(connector) = self.connectors.get(connector_id) else {
                continue;
            };
            let status = connector.lock().await.status.clone();
            self.send_status_notification(connector_id, status).await;
        }
    }

    // ── ChangeAvailability ─────────────────────────────────

    async fn handle_change_availability(
        &self,
        request: ChangeAvailabilityRequest,
    ) -> Result<ChangeAvailabilityResponse, CallFault> {
        let connector_id = request.connector_id;
        info!(connector_id, kind = ?request.kind, "ChangeAvailability");

        if !self.connectors.is_valid(connector_id) {
            return Err(CallFault::property_constraint(format!(
                "Invalid connector id {}",
                connector_id
            )));
        }

        let targets: Vec<u32> = if connector_id == 0 {
            self.connectors.ids().collect()
        } else {
            vec![connector_id]
        };

        // An Inoperative request against a running transaction is applied
        // once the transaction ends.
        if request.kind == AvailabilityType::Inoperative {
            let mut scheduled = false;
            for id in &targets {
                let Some(connector) = self.connectors.get(*id) else {
                    continue;
                };
                let mut state = connector.lock().await;
                if state.transaction_active {
                    state.scheduled_inoperative = true;
                    scheduled = true;
                }
            }
            if scheduled {
                return Ok(ChangeAvailabilityResponse {
                    status: AvailabilityStatus::Scheduled,
                });
            }
        }

        let verdict = self
            .events
            .change_availability_requested(connector_id, request.kind.clone())
            .await;
        if verdict != AvailabilityStatus::Accepted {
            return Ok(ChangeAvailabilityResponse { status: verdict });
        }

        for id in targets {
            self.apply_availability(id, request.kind.clone()).await;
        }
        Ok(ChangeAvailabilityResponse {
            status: AvailabilityStatus::Accepted,
        })
    }

    async fn apply_availability(&self, connector_id: u32, kind: AvailabilityType) {
        let key = format!("{}{}", CONNECTOR_AVAILABILITY_KEY_PREFIX, connector_id);
        let (value, status) = match kind {
            AvailabilityType::Inoperative => ("Inoperative", ChargePointStatus::Unavailable),
            AvailabilityType::Operative => ("Operative", ChargePointStatus::Available),
        };
        if let Err(e) = self.internal_config.set(&key, value).await {
            warn!(connector_id, error = %e, "Failed to persist availability");
        }
        self.update_connector_status(connector_id, status).await;
    }

    /// Called when a transaction ends: apply a scheduled Inoperative.
    pub async fn on_transaction_finished(&self, connector_id: u32) {
        let Some(connector) = self.connectors.get(connector_id) else {
            return;
        };
        let scheduled = {
            let mut state = connector.lock().await;
            std::mem::take(&mut state.scheduled_inoperative)
        };
        if scheduled {
            info!(connector_id, "Applying scheduled Inoperative");
            self.apply_availability(connector_id, AvailabilityType::Inoperative)
                .await;
        }
    }
}

/// Triggers owned by this manager: BootNotification, Heartbeat and
/// StatusNotification. The actual message is sent after the Accepted
/// response goes out.
#[async_trait]
impl TriggerHandler for StatusManager {
    async fn on_trigger(&self, trigger: MessageTrigger, connector_id: Option<u32>) -> bool {
        match trigger {
            MessageTrigger::Heartbeat => {
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let _: Result<HeartbeatResponse, _> =
                        sender.call("Heartbeat", &HeartbeatRequest {}).await;
                });
                true
            }
            MessageTrigger::BootNotification => {
                let station = self.station.clone();
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let request = BootNotificationRequest {
                        charge_point_vendor: station.vendor.clone(),
                        charge_point_model: station.model.clone(),
                        charge_point_serial_number: station.serial_number.clone(),
                        charge_box_serial_number: None,
                        firmware_version: station.firmware_version.clone(),
                        iccid: None,
                        imsi: None,
                        meter_type: None,
                        meter_serial_number: None,
                    };
                    let _: Result<BootNotificationResponse, _> =
                        sender.call("BootNotification", &request).await;
                });
                true
            }
            MessageTrigger::StatusNotification => {
                let connectors = self.connectors.clone();
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let ids: Vec<u32> = match connector_id {
                        Some(id) => vec![id],
                        None => (0..=connectors.count()).collect(),
                    };
                    for id in ids {
                        let Some(connector) = connectors.get(id) else {
                            continue;
                        };
                        let status = connector.lock().await.status.clone();
                        let request = StatusNotificationRequest {
                            connector_id: id,
                            error_code: ChargePointErrorCode::NoError,
                            info: None,
                            status,
                            timestamp: Some(Utc::now()),
                            vendor_id: None,
                            vendor_error_code: None,
                        };
                        let _: Result<StatusNotificationResponse, _> =
                            sender.call("StatusNotification", &request).await;
                    }
                });
                true
            }
            _ => false,
        }
    }
}

//! Meter value sampling.
//!
//! Two periodic streams: per-transaction samples every
//! `MeterValueSampleInterval` (queued through the transaction FIFO, they
//! carry the transaction id), and station-wide clock-aligned samples every
//! `ClockAlignedDataInterval` (best-effort, sent directly). Samples taken
//! before the transaction id is known are parked on the connector and
//! flushed by the transaction manager at id assignment.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Measurand, MessageTrigger, MeterValue};
use tracing::{debug, warn};

use crate::chargepoint::connectors::Connectors;
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::ocpp_config::{
    OcppConfig, CLOCK_ALIGNED_DATA_INTERVAL, METER_VALUE_SAMPLE_INTERVAL,
};
use crate::chargepoint::transaction::RequestFifo;
use crate::chargepoint::trigger::TriggerHandler;
use crate::messages::MessageSender;
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::{spawn_periodic, TimerHandle};

pub struct MeterValuesManager {
    connectors: Arc<Connectors>,
    fifo: Arc<RequestFifo>,
    sender: MessageSender,
    events: Arc<dyn ChargePointEventsHandler>,
    ocpp_config: Arc<OcppConfig>,
    shutdown: ShutdownSignal,
    samplers: std::sync::Mutex<HashMap<u32, TimerHandle>>,
    aligned: std::sync::Mutex<Option<TimerHandle>>,
}

impl MeterValuesManager {
    pub fn new(
        connectors: Arc<Connectors>,
        fifo: Arc<RequestFifo>,
        sender: MessageSender,
        events: Arc<dyn ChargePointEventsHandler>,
        ocpp_config: Arc<OcppConfig>,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        Arc::new(Self {
            connectors,
            fifo,
            sender,
            events,
            ocpp_config,
            shutdown,
            samplers: std::sync::Mutex::new(HashMap::new()),
            aligned: std::sync::Mutex::new(None),
        })
    }

    /// Start the clock-aligned stream and watch for interval changes.
    pub fn start(self: &Arc<Self>) {
        self.restart_aligned_timer();

        let manager = self.clone();
        let mut changes = self.ocpp_config.subscribe_changes();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => {
                        match change {
                            Ok((key, _)) if key == CLOCK_ALIGNED_DATA_INTERVAL => {
                                manager.restart_aligned_timer();
                            }
                            Ok((key, _)) if key == METER_VALUE_SAMPLE_INTERVAL => {
                                manager.restart_active_samplers();
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                    _ = shutdown.wait() => break,
                }
            }
        });
    }

    /// Begin per-transaction sampling for a connector.
    pub fn start_sampling(self: &Arc<Self>, connector_id: u32) {
        let interval_secs = self.ocpp_config.meter_value_sample_interval_secs();
        if interval_secs == 0 {
            return;
        }
        let manager = self.clone();
        let handle = spawn_periodic(
            "meter-sample",
            Duration::from_secs(interval_secs),
            self.shutdown.clone(),
            move || {
                let manager = manager.clone();
                async move {
                    manager.sample_transaction(connector_id).await;
                }
            },
        );
        self.samplers.lock().unwrap().insert(connector_id, handle);
        debug!(connector_id, interval_secs, "Transaction sampling started");
    }

    pub fn stop_sampling(&self, connector_id: u32) {
        if let Some(handle) = self.samplers.lock().unwrap().remove(&connector_id) {
            handle.stop();
            debug!(connector_id, "Transaction sampling stopped");
        }
    }

    fn restart_active_samplers(self: &Arc<Self>) {
        let active: Vec<u32> = {
            let mut samplers = self.samplers.lock().unwrap();
            let ids = samplers.keys().copied().collect();
            for (_, handle) in samplers.drain() {
                handle.stop();
            }
            ids
        };
        for connector_id in active {
            self.start_sampling(connector_id);
        }
    }

    fn restart_aligned_timer(self: &Arc<Self>) {
        let mut slot = self.aligned.lock().unwrap();
        if let Some(handle) = slot.take() {
            handle.stop();
        }
        let interval_secs = self.ocpp_config.clock_aligned_data_interval_secs();
        if interval_secs == 0 {
            return;
        }
        let manager = self.clone();
        *slot = Some(spawn_periodic(
            "clock-aligned-sample",
            Duration::from_secs(interval_secs),
            self.shutdown.clone(),
            move || {
                let manager = manager.clone();
                async move {
                    manager.sample_clock_aligned().await;
                }
            },
        ));
    }

    /// Read the configured measurands for a connector.
    async fn collect(&self, connector_id: u32) -> Vec<MeterValue> {
        let mut values = Vec::new();
        for name in self.ocpp_config.meter_values_sampled_data() {
            let Some(measurand) = measurand_from_str(&name) else {
                warn!(measurand = name.as_str(), "Unknown measurand in configuration");
                continue;
            };
            if let Some(value) = self.events.get_meter_value(connector_id, &measurand).await {
                values.push(value);
            }
        }
        values
    }

    /// One per-transaction sample: queue it with the transaction id, or park
    /// it on the connector while the id is still unknown.
    async fn sample_transaction(&self, connector_id: u32) {
        let values = self.collect(connector_id).await;
        if values.is_empty() {
            return;
        }
        self.events.meter_value(connector_id).await;

        let Some(connector) = self.connectors.get(connector_id) else {
            return;
        };
        let mut state = connector.lock().await;
        if !state.transaction_active {
            return;
        }
        match state.transaction_id {
            Some(transaction_id) => {
                drop(state);
                let request = MeterValuesRequest {
                    connector_id,
                    transaction_id: Some(transaction_id),
                    meter_value: values,
                };
                match serde_json::to_value(&request) {
                    Ok(payload) => {
                        if let Err(e) = self.fifo.push("MeterValues", payload).await {
                            warn!(connector_id, error = %e, "Failed to queue meter values");
                        }
                    }
                    Err(e) => warn!(error = %e, "Unserializable meter values"),
                }
            }
            None => {
                debug!(connector_id, "Parking meter sample until transaction id is known");
                state.pending_meter_values.extend(values);
            }
        }
    }

    /// One clock-aligned pass over the station and all connectors.
    async fn sample_clock_aligned(&self) {
        for connector_id in 0..=self.connectors.count() {
            let values = self.collect(connector_id).await;
            if values.is_empty() {
                continue;
            }
            let request = MeterValuesRequest {
                connector_id,
                transaction_id: None,
                meter_value: values,
            };
            let result: Result<MeterValuesResponse, _> =
                self.sender.call("MeterValues", &request).await;
            if let Err(e) = result {
                debug!(connector_id, error = %e, "Clock-aligned meter values not delivered");
            }
        }
    }

    async fn send_immediate(&self, connector_id: u32) {
        let values = self.collect(connector_id).await;
        if values.is_empty() {
            return;
        }
        let transaction_id = match self.connectors.get(connector_id) {
            Some(connector) => connector.lock().await.transaction_id,
            None => None,
        };
        let request = MeterValuesRequest {
            connector_id,
            transaction_id,
            meter_value: values,
        };
        let result: Result<MeterValuesResponse, _> =
            self.sender.call("MeterValues", &request).await;
        if let Err(e) = result {
            warn!(connector_id, error = %e, "Triggered meter values not delivered");
        }
    }
}

/// Parse a measurand from its OCPP wire name (e.g.
/// `Energy.Active.Import.Register`).
fn measurand_from_str(name: &str) -> Option<Measurand> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

/// Trigger adapter for `MessageTrigger::MeterValues`; registered in place of
/// the manager so the spawned send can own an `Arc`.
pub struct MeterValuesTrigger(pub Arc<MeterValuesManager>);

#[async_trait]
impl TriggerHandler for MeterValuesTrigger {
    async fn on_trigger(&self, _trigger: MessageTrigger, connector_id: Option<u32>) -> bool {
        let connector_id = connector_id.unwrap_or(0);
        if !self.0.sender.is_connected() {
            return false;
        }

        // Answer Accepted first; the sample goes out asynchronously.
        let manager = self.0.clone();
        tokio::spawn(async move {
            manager.send_immediate(connector_id).await;
        });
        true
    }
}

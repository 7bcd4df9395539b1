//! Transaction lifecycle and the FIFO retry driver.
//!
//! `start_transaction`/`stop_transaction` are the local swipe entry points;
//! RemoteStart/RemoteStop arrive from the Central System. All
//! billing-relevant calls go through the durable FIFO, which the retry
//! driver drains strictly head-first whenever the station is connected and
//! registered. Only the driver pops.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{StopTransactionRequest, StopTransactionResponse};
use rust_ocpp::v1_6::messages::meter_values::MeterValuesRequest;
use rust_ocpp::v1_6::types::{
    AuthorizationStatus, ChargePointStatus, ChargingProfilePurposeType, Reason,
    RemoteStartStopStatus,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::RequestFifo;
use crate::chargepoint::authent::AuthentManager;
use crate::chargepoint::connectors::{Connectors, PendingStop};
use crate::chargepoint::events::ChargePointEventsHandler;
use crate::chargepoint::metervalues::MeterValuesManager;
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::chargepoint::smartcharging::SmartChargingManager;
use crate::chargepoint::status::StatusManager;
use crate::messages::{MessageDispatcher, MessageSender};
use crate::support::errors::{RpcError, StationError, StationResult};
use crate::support::shutdown::ShutdownSignal;

pub struct TransactionManager {
    connectors: Arc<Connectors>,
    fifo: Arc<RequestFifo>,
    sender: MessageSender,
    authent: Arc<AuthentManager>,
    smart_charging: Arc<SmartChargingManager>,
    status: Arc<StatusManager>,
    meter_values: Arc<MeterValuesManager>,
    events: Arc<dyn ChargePointEventsHandler>,
    ocpp_config: Arc<OcppConfig>,
    registration: watch::Receiver<bool>,
    shutdown: ShutdownSignal,
}

impl TransactionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connectors: Arc<Connectors>,
        fifo: Arc<RequestFifo>,
        sender: MessageSender,
        authent: Arc<AuthentManager>,
        smart_charging: Arc<SmartChargingManager>,
        status: Arc<StatusManager>,
        meter_values: Arc<MeterValuesManager>,
        events: Arc<dyn ChargePointEventsHandler>,
        ocpp_config: Arc<OcppConfig>,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        let registration = status.registration_watch();
        Arc::new(Self {
            connectors,
            fifo,
            sender,
            authent,
            smart_charging,
            status,
            meter_values,
            events,
            ocpp_config,
            registration,
            shutdown,
        })
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let manager = self.clone();
        dispatcher.register_typed(
            "RemoteStartTransaction",
            move |request: RemoteStartTransactionRequest| {
                let manager = manager.clone();
                async move { Ok(manager.handle_remote_start(request).await) }
            },
        )?;

        let manager = self.clone();
        dispatcher.register_typed(
            "RemoteStopTransaction",
            move |request: RemoteStopTransactionRequest| {
                let manager = manager.clone();
                async move { Ok(manager.handle_remote_stop(request).await) }
            },
        )?;

        Ok(())
    }

    /// Spawn the retry driver.
    pub fn start(self: &Arc<Self>) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.run_driver().await;
            info!("Transaction FIFO driver stopped");
        });
    }

    // ── Local lifecycle ────────────────────────────────────

    /// Start a transaction for a locally presented idTag.
    pub async fn start_transaction(
        &self,
        connector_id: u32,
        id_tag: &str,
    ) -> StationResult<AuthorizationStatus> {
        self.start_transaction_inner(connector_id, id_tag, false)
            .await
    }

    async fn start_transaction_inner(
        &self,
        connector_id: u32,
        id_tag: &str,
        skip_authorization: bool,
    ) -> StationResult<AuthorizationStatus> {
        if !self.connectors.is_chargeable(connector_id) {
            return Err(StationError::InvalidConnector(connector_id));
        }
        let connector = self
            .connectors
            .get(connector_id)
            .ok_or(StationError::InvalidConnector(connector_id))?;

        self.events
            .authorization_requested(connector_id, id_tag)
            .await;

        // Reservation interlock: an unexpired reservation only admits its
        // own tag or a tag sharing its parent.
        let reservation = {
            let mut state = connector.lock().await;
            if state.transaction_active {
                return Ok(AuthorizationStatus::ConcurrentTx);
            }
            match &state.reservation {
                Some(reservation) if reservation.expiry < Utc::now() => {
                    state.reservation = None;
                    None
                }
                other => other.clone(),
            }
        };
        if let Some(reservation) = &reservation {
            let parent = self.authent.parent_id_tag(id_tag).await?;
            if !reservation.matches(id_tag, parent.as_deref()) {
                info!(
                    connector_id,
                    reservation_id = reservation.reservation_id,
                    "Tag refused by reservation"
                );
                return Ok(AuthorizationStatus::Invalid);
            }
        }

        if !skip_authorization {
            let info = self.authent.authorize(id_tag).await?;
            if info.status != AuthorizationStatus::Accepted {
                info!(connector_id, tag = id_tag, status = ?info.status, "Start refused");
                return Ok(info.status);
            }
        }

        let meter_start = self.events.get_tx_start_stop_meter_value(connector_id).await;
        let now = Utc::now();

        let reservation_id = {
            let mut state = connector.lock().await;
            if state.transaction_active {
                return Ok(AuthorizationStatus::ConcurrentTx);
            }
            state.transaction_active = true;
            state.transaction_id = None;
            state.transaction_id_tag = Some(id_tag.to_string());
            state.transaction_start = Some(now);
            state.reservation.take().map(|r| r.reservation_id)
        };

        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.to_string(),
            meter_start,
            reservation_id,
            timestamp: now,
        };
        self.fifo
            .push("StartTransaction", serde_json::to_value(&request)?)
            .await?;

        self.status
            .update_connector_status(connector_id, ChargePointStatus::Charging)
            .await;
        self.meter_values.start_sampling(connector_id);

        info!(connector_id, tag = id_tag, "Transaction started");
        Ok(AuthorizationStatus::Accepted)
    }

    /// Stop the running transaction on a connector.
    ///
    /// With an idTag that differs from the one that started the session, the
    /// stop is only honored when that tag authorizes successfully.
    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        id_tag: Option<&str>,
        reason: Reason,
    ) -> StationResult<bool> {
        if !self.connectors.is_chargeable(connector_id) {
            return Err(StationError::InvalidConnector(connector_id));
        }
        let connector = self
            .connectors
            .get(connector_id)
            .ok_or(StationError::InvalidConnector(connector_id))?;

        let started_by = {
            let state = connector.lock().await;
            if !state.transaction_active {
                return Ok(false);
            }
            state.transaction_id_tag.clone()
        };

        if let Some(tag) = id_tag {
            if started_by.as_deref() != Some(tag) {
                let info = self.authent.authorize(tag).await?;
                if info.status != AuthorizationStatus::Accepted {
                    info!(connector_id, tag, "Stop refused for foreign tag");
                    return Ok(false);
                }
            }
        }

        let meter_stop = self.events.get_tx_start_stop_meter_value(connector_id).await;
        let now = Utc::now();

        self.meter_values.stop_sampling(connector_id);
        self.smart_charging.clear_tx_profiles(connector_id).await;

        let queued_stop = {
            let mut state = connector.lock().await;
            match state.transaction_id {
                Some(transaction_id) => {
                    state.clear_transaction();
                    Some(StopTransactionRequest {
                        id_tag: id_tag.map(str::to_string),
                        meter_stop,
                        timestamp: now,
                        transaction_id,
                        reason: Some(reason.clone()),
                        transaction_data: None,
                    })
                }
                None => {
                    // StartTransaction confirmation still pending: park the
                    // stop, the driver emits it once the id is known.
                    state.transaction_active = false;
                    state.pending_stop = Some(PendingStop {
                        id_tag: id_tag.map(str::to_string),
                        meter_stop,
                        timestamp: now,
                        reason: reason.clone(),
                    });
                    None
                }
            }
        };

        if let Some(request) = queued_stop {
            self.fifo
                .push("StopTransaction", serde_json::to_value(&request)?)
                .await?;
        }

        self.status
            .update_connector_status(connector_id, ChargePointStatus::Finishing)
            .await;
        self.status.on_transaction_finished(connector_id).await;
        self.events.transaction_stopped(connector_id, reason).await;

        info!(connector_id, "Transaction stopped");
        Ok(true)
    }

    // ── Remote requests ────────────────────────────────────

    async fn handle_remote_start(
        self: &Arc<Self>,
        request: RemoteStartTransactionRequest,
    ) -> RemoteStartTransactionResponse {
        let connector_id = match request.connector_id {
            Some(id) if self.connectors.is_chargeable(id) => id,
            Some(id) => {
                warn!(connector_id = id, "RemoteStart on invalid connector");
                return RemoteStartTransactionResponse {
                    status: RemoteStartStopStatus::Rejected,
                };
            }
            None => match self.first_idle_connector().await {
                Some(id) => id,
                None => {
                    warn!("RemoteStart with no idle connector");
                    return RemoteStartTransactionResponse {
                        status: RemoteStartStopStatus::Rejected,
                    };
                }
            },
        };

        info!(connector_id, tag = request.id_tag.as_str(), "RemoteStartTransaction");
        if !self
            .events
            .remote_start_requested(connector_id, &request.id_tag)
            .await
        {
            return RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            };
        }

        let had_profile = request.charging_profile.is_some();
        let profile = request.charging_profile.filter(|profile| {
            profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile
        });
        if had_profile && profile.is_none() {
            // A RemoteStart may only carry a TxProfile.
            return RemoteStartTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            };
        }

        let manager = self.clone();
        let id_tag = request.id_tag;
        let skip_authorization = !self.ocpp_config.authorize_remote_tx_requests();
        tokio::spawn(async move {
            match manager
                .start_transaction_inner(connector_id, &id_tag, skip_authorization)
                .await
            {
                Ok(AuthorizationStatus::Accepted) => {
                    if let Some(profile) = profile {
                        manager
                            .smart_charging
                            .install_tx_profile(connector_id, profile)
                            .await;
                    }
                }
                Ok(status) => {
                    info!(connector_id, ?status, "RemoteStart did not start a transaction")
                }
                Err(e) => warn!(connector_id, error = %e, "RemoteStart failed"),
            }
        });

        RemoteStartTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        }
    }

    async fn handle_remote_stop(
        self: &Arc<Self>,
        request: RemoteStopTransactionRequest,
    ) -> RemoteStopTransactionResponse {
        let transaction_id = request.transaction_id;
        info!(transaction_id, "RemoteStopTransaction");

        let mut target = None;
        for connector_id in self.connectors.ids() {
            if let Some(connector) = self.connectors.get(connector_id) {
                let state = connector.lock().await;
                if state.transaction_active && state.transaction_id == Some(transaction_id) {
                    target = Some(connector_id);
                    break;
                }
            }
        }

        let Some(connector_id) = target else {
            warn!(transaction_id, "RemoteStop for unknown transaction");
            return RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            };
        };

        if !self.events.remote_stop_requested(connector_id).await {
            return RemoteStopTransactionResponse {
                status: RemoteStartStopStatus::Rejected,
            };
        }

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager
                .stop_transaction(connector_id, None, Reason::Remote)
                .await
            {
                warn!(connector_id, error = %e, "RemoteStop failed");
            }
        });

        RemoteStopTransactionResponse {
            status: RemoteStartStopStatus::Accepted,
        }
    }

    async fn first_idle_connector(&self) -> Option<u32> {
        for connector_id in self.connectors.ids() {
            if let Some(connector) = self.connectors.get(connector_id) {
                let state = connector.lock().await;
                if !state.transaction_active && state.status == ChargePointStatus::Available {
                    return Some(connector_id);
                }
            }
        }
        None
    }

    // ── FIFO retry driver ──────────────────────────────────

    async fn run_driver(&self) {
        let mut registration = self.registration.clone();
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_triggered() {
                return;
            }

            // Pause until the station is connected and registered.
            if !*registration.borrow() {
                tokio::select! {
                    changed = registration.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        attempt = 0;
                        continue;
                    }
                    _ = self.shutdown.wait() => return,
                }
            }

            let Some((action, payload)) = self.fifo.front().await else {
                tokio::select! {
                    _ = self.fifo.wait_for_push() => continue,
                    _ = self.shutdown.wait() => return,
                }
            };

            debug!(action = action.as_str(), attempt, "FIFO driver sending");
            match self.sender.call_raw(&action, payload.clone()).await {
                Ok(confirmation) => {
                    match self
                        .apply_confirmation(&action, &payload, confirmation)
                        .await
                    {
                        Ok(()) => {}
                        Err(StationError::Serialization(e)) => {
                            // The request WAS acknowledged; an unreadable
                            // confirmation must not wedge the queue.
                            warn!(action = action.as_str(), error = %e, "Unreadable confirmation");
                        }
                        Err(e) => {
                            // Transient (database) failure: keep the head
                            // and retry after the configured interval.
                            warn!(error = %e, "Confirmation processing failed, rescheduling");
                            self.retry_delay(1).await;
                            continue;
                        }
                    }
                    attempt = 0;
                    if let Err(e) = self.fifo.pop().await {
                        warn!(error = %e, "FIFO pop failed");
                        self.retry_delay(1).await;
                    }
                }
                Err(RpcError::NotConnected) | Err(RpcError::Aborted) => {
                    // Connection went down mid-call: pause until the
                    // registration watch catches up, resume at head.
                    attempt = 0;
                    self.retry_delay(1).await;
                }
                Err(e) if e.is_retryable() => {
                    attempt += 1;
                    let max_attempts = self.ocpp_config.transaction_message_attempts();
                    if attempt >= max_attempts {
                        warn!(
                            action = action.as_str(),
                            attempts = attempt,
                            "Transaction request undeliverable, dropping"
                        );
                        let _ = self.fifo.pop().await;
                        attempt = 0;
                    } else {
                        warn!(action = action.as_str(), attempt, error = %e, "Retrying");
                        self.retry_delay(attempt).await;
                    }
                }
                Err(e) => {
                    // Schema or constraint violation: resending the same
                    // payload can never succeed.
                    warn!(action = action.as_str(), error = %e, "Rejected permanently, dropping");
                    let _ = self.fifo.pop().await;
                    attempt = 0;
                }
            }
        }
    }

    async fn retry_delay(&self, attempt: u32) {
        let interval = self.ocpp_config.transaction_message_retry_interval_secs();
        let delay = std::time::Duration::from_secs(interval.saturating_mul(attempt as u64).max(1));
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = self.shutdown.wait() => {}
        }
    }

    /// Apply the side effects of an acknowledged transaction request before
    /// it is popped.
    async fn apply_confirmation(
        &self,
        action: &str,
        request: &Value,
        confirmation: Value,
    ) -> StationResult<()> {
        match action {
            "StartTransaction" => {
                let request: StartTransactionRequest = serde_json::from_value(request.clone())?;
                let confirmation: StartTransactionResponse = serde_json::from_value(confirmation)?;
                self.on_start_transaction_conf(request, confirmation).await
            }
            "StopTransaction" => {
                let request: StopTransactionRequest = serde_json::from_value(request.clone())?;
                let confirmation: StopTransactionResponse = serde_json::from_value(confirmation)?;
                if let (Some(id_tag), Some(info)) = (request.id_tag, confirmation.id_tag_info) {
                    self.authent.on_central_verdict(&id_tag, &info).await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_start_transaction_conf(
        &self,
        request: StartTransactionRequest,
        confirmation: StartTransactionResponse,
    ) -> StationResult<()> {
        let connector_id = request.connector_id;
        let transaction_id = confirmation.transaction_id;
        info!(connector_id, transaction_id, "StartTransaction confirmed");

        let connector = self
            .connectors
            .get(connector_id)
            .ok_or(StationError::InvalidConnector(connector_id))?;

        let (pending_meter_values, pending_stop, still_active) = {
            let mut state = connector.lock().await;
            state.transaction_id = Some(transaction_id);
            (
                std::mem::take(&mut state.pending_meter_values),
                state.pending_stop.take(),
                state.transaction_active,
            )
        };

        self.authent
            .on_central_verdict(&request.id_tag, &confirmation.id_tag_info)
            .await?;
        self.smart_charging
            .assign_pending_tx_profiles(connector_id, transaction_id)
            .await;
        self.events
            .transaction_started(connector_id, transaction_id)
            .await;

        // Samples and a stop parked while the id was unknown now flow into
        // the queue, behind the StartTransaction they belong to.
        if !pending_meter_values.is_empty() {
            let meter_values = MeterValuesRequest {
                connector_id,
                transaction_id: Some(transaction_id),
                meter_value: pending_meter_values,
            };
            self.fifo
                .push("MeterValues", serde_json::to_value(&meter_values)?)
                .await?;
        }
        if let Some(stop) = pending_stop {
            let request = StopTransactionRequest {
                id_tag: stop.id_tag,
                meter_stop: stop.meter_stop,
                timestamp: stop.timestamp,
                transaction_id,
                reason: Some(stop.reason),
                transaction_data: None,
            };
            self.fifo
                .push("StopTransaction", serde_json::to_value(&request)?)
                .await?;
            connector.lock().await.clear_transaction();
        }

        if confirmation.id_tag_info.status != AuthorizationStatus::Accepted {
            warn!(connector_id, status = ?confirmation.id_tag_info.status, "Transaction deauthorized");
            self.events.transaction_deauthorized(connector_id).await;
            if still_active && self.ocpp_config.stop_transaction_on_invalid_id() {
                if let Err(e) = self
                    .stop_transaction(connector_id, None, Reason::DeAuthorized)
                    .await
                {
                    warn!(connector_id, error = %e, "Deauthorized stop failed");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The manager's moving parts (authorization chain, FIFO ordering,
    // setpoint interaction) are covered by their own modules and by the
    // integration tests in `tests/`; here we pin the pure decision helpers.

    #[test]
    fn retryable_classification_drives_the_driver() {
        assert!(RpcError::Timeout.is_retryable());
        assert!(!RpcError::Call {
            code: crate::rpc::frame::RpcErrorCode::FormationViolation,
            description: String::new(),
        }
        .is_retryable());
    }
}

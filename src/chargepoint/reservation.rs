//! Reservations.
//!
//! A reservation pins a connector to an idTag (or a parent group) until it
//! is consumed by a matching StartTransaction, cancelled by the Central
//! System, or expires. The connector shows `Reserved` while one is
//! installed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
use rust_ocpp::v1_6::types::{CancelReservationStatus, ChargePointStatus, ReservationStatus};
use tracing::{info, warn};

use crate::chargepoint::connectors::{Connectors, Reservation};
use crate::chargepoint::ocpp_config::OcppConfig;
use crate::chargepoint::status::StatusManager;
use crate::messages::dispatcher::CallFault;
use crate::messages::MessageDispatcher;
use crate::support::errors::StationResult;
use crate::support::shutdown::ShutdownSignal;
use crate::support::timer::{spawn_once, TimerHandle};

pub struct ReservationManager {
    connectors: Arc<Connectors>,
    status: Arc<StatusManager>,
    ocpp_config: Arc<OcppConfig>,
    shutdown: ShutdownSignal,
    expiry_timers: std::sync::Mutex<HashMap<i32, TimerHandle>>,
}

impl ReservationManager {
    pub fn new(
        connectors: Arc<Connectors>,
        status: Arc<StatusManager>,
        ocpp_config: Arc<OcppConfig>,
        shutdown: ShutdownSignal,
    ) -> Arc<Self> {
        Arc::new(Self {
            connectors,
            status,
            ocpp_config,
            shutdown,
            expiry_timers: std::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn register_handlers(
        self: &Arc<Self>,
        dispatcher: &MessageDispatcher,
    ) -> StationResult<()> {
        let manager = self.clone();
        dispatcher.register_typed("ReserveNow", move |request: ReserveNowRequest| {
            let manager = manager.clone();
            async move { manager.handle_reserve_now(request).await }
        })?;

        let manager = self.clone();
        dispatcher.register_typed(
            "CancelReservation",
            move |request: CancelReservationRequest| {
                let manager = manager.clone();
                async move { Ok(manager.handle_cancel_reservation(request).await) }
            },
        )?;

        Ok(())
    }

    async fn handle_reserve_now(
        self: &Arc<Self>,
        request: ReserveNowRequest,
    ) -> Result<ReserveNowResponse, CallFault> {
        let connector_id = request.connector_id;
        info!(
            connector_id,
            reservation_id = request.reservation_id,
            tag = request.id_tag.as_str(),
            "ReserveNow"
        );

        if !self.connectors.is_valid(connector_id) {
            return Err(CallFault::property_constraint(format!(
                "Invalid connector id {}",
                connector_id
            )));
        }
        if connector_id == 0 && !self.ocpp_config.reserve_connector_zero_supported() {
            return Ok(ReserveNowResponse {
                status: ReservationStatus::Rejected,
            });
        }

        let connector = match self.connectors.get(connector_id) {
            Some(connector) => connector,
            None => {
                return Ok(ReserveNowResponse {
                    status: ReservationStatus::Rejected,
                })
            }
        };

        let status = {
            let mut state = connector.lock().await;
            match state.status {
                ChargePointStatus::Faulted => ReservationStatus::Faulted,
                ChargePointStatus::Unavailable => ReservationStatus::Unavailable,
                _ if state.transaction_active => ReservationStatus::Occupied,
                _ => {
                    // Replacing a reservation with the same id is an update;
                    // a different id on a reserved connector is a conflict.
                    let replaceable = state
                        .reservation
                        .as_ref()
                        .map(|r| r.reservation_id == request.reservation_id)
                        .unwrap_or(true);
                    if !replaceable {
                        ReservationStatus::Occupied
                    } else {
                        state.reservation = Some(Reservation {
                            reservation_id: request.reservation_id,
                            id_tag: request.id_tag.clone(),
                            parent_id_tag: request.parent_id_tag.clone(),
                            expiry: request.expiry_date,
                        });
                        ReservationStatus::Accepted
                    }
                }
            }
        };

        if status == ReservationStatus::Accepted {
            self.status
                .update_connector_status(connector_id, ChargePointStatus::Reserved)
                .await;
            self.arm_expiry(request.reservation_id, connector_id, request.expiry_date);
        }

        info!(?status, "ReserveNow handled");
        Ok(ReserveNowResponse { status })
    }

    async fn handle_cancel_reservation(
        &self,
        request: CancelReservationRequest,
    ) -> CancelReservationResponse {
        info!(reservation_id = request.reservation_id, "CancelReservation");

        for connector_id in self.connectors.ids() {
            let Some(connector) = self.connectors.get(connector_id) else {
                continue;
            };
            let cancelled = {
                let mut state = connector.lock().await;
                match &state.reservation {
                    Some(reservation) if reservation.reservation_id == request.reservation_id => {
                        state.reservation = None;
                        true
                    }
                    _ => false,
                }
            };
            if cancelled {
                self.disarm_expiry(request.reservation_id);
                self.status
                    .update_connector_status(connector_id, ChargePointStatus::Available)
                    .await;
                return CancelReservationResponse {
                    status: CancelReservationStatus::Accepted,
                };
            }
        }

        warn!(reservation_id = request.reservation_id, "Unknown reservation");
        CancelReservationResponse {
            status: CancelReservationStatus::Rejected,
        }
    }

    fn arm_expiry(
        self: &Arc<Self>,
        reservation_id: i32,
        connector_id: u32,
        expiry: chrono::DateTime<Utc>,
    ) {
        let delay = (expiry - Utc::now())
            .to_std()
            .unwrap_or(Duration::from_secs(0));

        let manager = self.clone();
        let handle = spawn_once("reservation-expiry", delay, self.shutdown.clone(), move || {
            let manager = manager.clone();
            async move {
                manager.expire(reservation_id, connector_id).await;
            }
        });

        let mut timers = self.expiry_timers.lock().unwrap();
        if let Some(previous) = timers.insert(reservation_id, handle) {
            previous.stop();
        }
    }

    fn disarm_expiry(&self, reservation_id: i32) {
        if let Some(handle) = self.expiry_timers.lock().unwrap().remove(&reservation_id) {
            handle.stop();
        }
    }

    async fn expire(&self, reservation_id: i32, connector_id: u32) {
        let Some(connector) = self.connectors.get(connector_id) else {
            return;
        };
        let expired = {
            let mut state = connector.lock().await;
            match &state.reservation {
                Some(reservation) if reservation.reservation_id == reservation_id => {
                    state.reservation = None;
                    true
                }
                _ => false,
            }
        };
        if expired {
            info!(reservation_id, connector_id, "Reservation expired");
            self.expiry_timers.lock().unwrap().remove(&reservation_id);
            self.status
                .update_connector_status(connector_id, ChargePointStatus::Available)
                .await;
        }
    }
}

//! Callback surface towards the embedding station code.
//!
//! The stack owns the protocol; the station supplies meter readings and
//! contactor-level decisions through this trait. Every callback is invoked
//! from spawned tasks, never from the socket I/O task.

use async_trait::async_trait;
use rust_ocpp::v1_6::types::{
    AvailabilityStatus, AvailabilityType, ChargePointStatus, DataTransferStatus, Measurand,
    MeterValue, Reason, ResetRequestStatus, UnlockStatus,
};

#[async_trait]
pub trait ChargePointEventsHandler: Send + Sync {
    /// The connection to the Central System went up or down.
    async fn connection_state_changed(&self, _connected: bool) {}

    /// A connector changed state.
    async fn connector_status_changed(&self, _connector_id: u32, _status: ChargePointStatus) {}

    /// A local authorization decision is about to be made for `id_tag`.
    async fn authorization_requested(&self, _connector_id: u32, _id_tag: &str) {}

    /// The Central System assigned a transaction id to a running session.
    async fn transaction_started(&self, _connector_id: u32, _transaction_id: i32) {}

    /// A transaction ended locally.
    async fn transaction_stopped(&self, _connector_id: u32, _reason: Reason) {}

    /// A transaction opened offline was refused by the Central System once
    /// the connection came back.
    async fn transaction_deauthorized(&self, _connector_id: u32) {}

    /// A meter sample was taken for `connector_id`.
    async fn meter_value(&self, _connector_id: u32) {}

    /// Read a meter value for the given measurand; `None` if the measurand
    /// is not available on this hardware.
    async fn get_meter_value(&self, connector_id: u32, measurand: &Measurand)
        -> Option<MeterValue>;

    /// Wh register reading used for StartTransaction/StopTransaction.
    async fn get_tx_start_stop_meter_value(&self, connector_id: u32) -> i32;

    /// ChangeAvailability received for `connector_id` (0 = whole station).
    async fn change_availability_requested(
        &self,
        _connector_id: u32,
        _availability: AvailabilityType,
    ) -> AvailabilityStatus {
        AvailabilityStatus::Accepted
    }

    /// RemoteStartTransaction received; `true` accepts the request.
    async fn remote_start_requested(&self, _connector_id: u32, _id_tag: &str) -> bool {
        true
    }

    /// RemoteStopTransaction received; `true` accepts the request.
    async fn remote_stop_requested(&self, _connector_id: u32) -> bool {
        true
    }

    /// Reset received; the actual reboot may happen after returning `true`.
    async fn reset_requested(&self, _kind: ResetRequestStatus) -> bool {
        true
    }

    /// UnlockConnector received.
    async fn unlock_connector_requested(&self, _connector_id: u32) -> UnlockStatus {
        UnlockStatus::NotSupported
    }

    /// DataTransfer received; stations without vendor extensions leave the
    /// default in place.
    async fn data_transfer_requested(
        &self,
        _vendor_id: &str,
        _message_id: Option<&str>,
        _data: Option<&str>,
    ) -> (DataTransferStatus, Option<String>) {
        (DataTransferStatus::UnknownVendorId, None)
    }
}

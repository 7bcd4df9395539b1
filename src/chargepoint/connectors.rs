//! Connector arena.
//!
//! Connector id 0 denotes the station as a whole; physical connectors are
//! numbered from 1. Each connector is guarded by its own async mutex so
//! status transitions are serialized per connector; managers address
//! connectors by id and never hold references into each other's state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::{ChargePointStatus, ChargingProfile, MeterValue, Reason};
use tokio::sync::Mutex;

/// An installed reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub reservation_id: i32,
    pub id_tag: String,
    pub parent_id_tag: Option<String>,
    pub expiry: DateTime<Utc>,
}

impl Reservation {
    /// Whether `id_tag` (or its parent) may consume this reservation.
    pub fn matches(&self, id_tag: &str, parent_id_tag: Option<&str>) -> bool {
        if self.id_tag == id_tag {
            return true;
        }
        match (&self.parent_id_tag, parent_id_tag) {
            (Some(reserved_parent), Some(parent)) => reserved_parent == parent,
            _ => false,
        }
    }
}

/// A StopTransaction that happened before the transaction id was known.
#[derive(Debug, Clone)]
pub struct PendingStop {
    pub id_tag: Option<String>,
    pub meter_stop: i32,
    pub timestamp: DateTime<Utc>,
    pub reason: Reason,
}

/// Mutable state of one connector.
#[derive(Debug)]
pub struct Connector {
    pub id: u32,
    pub status: ChargePointStatus,

    /// Transaction id assigned by the Central System; `None` while a locally
    /// started transaction still awaits its StartTransaction confirmation.
    pub transaction_id: Option<i32>,

    /// Whether a transaction is running on this connector (it may not have a
    /// Central-System id yet).
    pub transaction_active: bool,

    pub transaction_id_tag: Option<String>,
    pub transaction_start: Option<DateTime<Utc>>,

    pub reservation: Option<Reservation>,

    /// TxProfiles received between RemoteStart and the StartTransaction
    /// confirmation; materialized once the transaction id is assigned.
    pub pending_tx_profiles: Vec<ChargingProfile>,

    /// Transactional meter samples taken before the transaction id was
    /// known; flushed to the FIFO at id assignment.
    pub pending_meter_values: Vec<MeterValue>,

    /// A stop that happened before the transaction id was known.
    pub pending_stop: Option<PendingStop>,

    /// Set while a ChangeAvailability to Inoperative waits for the running
    /// transaction to end.
    pub scheduled_inoperative: bool,
}

impl Connector {
    fn new(id: u32) -> Self {
        Self {
            id,
            status: ChargePointStatus::Available,
            transaction_id: None,
            transaction_active: false,
            transaction_id_tag: None,
            transaction_start: None,
            reservation: None,
            pending_tx_profiles: Vec::new(),
            pending_meter_values: Vec::new(),
            pending_stop: None,
            scheduled_inoperative: false,
        }
    }

    /// Reset all transaction state.
    pub fn clear_transaction(&mut self) {
        self.transaction_id = None;
        self.transaction_active = false;
        self.transaction_id_tag = None;
        self.transaction_start = None;
        self.pending_tx_profiles.clear();
        self.pending_meter_values.clear();
        self.pending_stop = None;
    }
}

/// All connectors of the station, indexed by id.
pub struct Connectors {
    slots: Vec<Arc<Mutex<Connector>>>,
}

impl Connectors {
    /// Create the arena for `count` physical connectors plus slot 0.
    pub fn new(count: u32) -> Self {
        let slots = (0..=count).map(|id| Arc::new(Mutex::new(Connector::new(id)))).collect();
        Self { slots }
    }

    /// Number of physical connectors (excluding slot 0).
    pub fn count(&self) -> u32 {
        (self.slots.len() - 1) as u32
    }

    /// Whether `id` addresses the station (0) or an existing connector.
    pub fn is_valid(&self, id: u32) -> bool {
        (id as usize) < self.slots.len()
    }

    /// Whether `id` addresses a physical connector (1..=count).
    pub fn is_chargeable(&self, id: u32) -> bool {
        id >= 1 && self.is_valid(id)
    }

    pub fn get(&self, id: u32) -> Option<Arc<Mutex<Connector>>> {
        self.slots.get(id as usize).cloned()
    }

    /// Ids of the physical connectors.
    pub fn ids(&self) -> impl Iterator<Item = u32> {
        1..=self.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_layout() {
        let connectors = Connectors::new(2);
        assert_eq!(connectors.count(), 2);
        assert!(connectors.is_valid(0));
        assert!(connectors.is_valid(2));
        assert!(!connectors.is_valid(3));
        assert!(!connectors.is_chargeable(0));
        assert!(connectors.is_chargeable(1));
        assert!(!connectors.is_chargeable(99));
        assert_eq!(connectors.ids().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn connectors_start_available() {
        let connectors = Connectors::new(1);
        let connector = connectors.get(1).unwrap();
        let state = connector.lock().await;
        assert_eq!(state.status, ChargePointStatus::Available);
        assert!(!state.transaction_active);
    }

    #[test]
    fn reservation_matching() {
        let reservation = Reservation {
            reservation_id: 7,
            id_tag: "TAG-A".into(),
            parent_id_tag: Some("FLEET".into()),
            expiry: Utc::now(),
        };
        assert!(reservation.matches("TAG-A", None));
        assert!(reservation.matches("TAG-B", Some("FLEET")));
        assert!(!reservation.matches("TAG-B", Some("OTHER")));
        assert!(!reservation.matches("TAG-B", None));
    }

    #[tokio::test]
    async fn clear_transaction_resets_state() {
        let connectors = Connectors::new(1);
        let connector = connectors.get(1).unwrap();
        {
            let mut state = connector.lock().await;
            state.transaction_active = true;
            state.transaction_id = Some(42);
            state.transaction_id_tag = Some("ABC".into());
            state.transaction_start = Some(Utc::now());
            state.clear_transaction();
            assert!(!state.transaction_active);
            assert_eq!(state.transaction_id, None);
            assert!(state.transaction_id_tag.is_none());
        }
    }
}

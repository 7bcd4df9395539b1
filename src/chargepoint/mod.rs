//! Charge point domain: connectors, authorization, transactions, smart
//! charging, triggers and the standardized configuration surface.

pub mod authent;
pub mod connectors;
pub mod events;
pub mod metervalues;
pub mod ocpp_config;
pub mod point;
pub mod reservation;
pub mod smartcharging;
pub mod status;
pub mod transaction;
pub mod trigger;

pub use connectors::{Connector, Connectors};
pub use events::ChargePointEventsHandler;
pub use ocpp_config::OcppConfig;
pub use point::ChargePoint;

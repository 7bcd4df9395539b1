//! # ocpp-station
//!
//! Station-side OCPP 1.6J stack: the charge-point-local control plane
//! talking to a Central System over one WebSocket carrying OCPP-J frames.
//!
//! ## Architecture
//!
//! - **support**: cross-cutting utilities (errors, shutdown, timers)
//! - **rpc**: OCPP-J framing, the WebSocket client peer and the accept side
//! - **messages**: inbound dispatch and typed outbound calls
//! - **chargepoint**: the domain: connectors, authorization (cache + local
//!   list), the durable transaction FIFO and its retry driver, smart
//!   charging, triggers, reservations, meter values, OCPP configuration
//! - **infrastructure**: SQLite persistence (entities, migrations,
//!   repositories)
//! - **config**: TOML stack configuration
//!
//! The embedding station supplies hardware callbacks through
//! [`ChargePointEventsHandler`] and drives the local surface of
//! [`ChargePoint`]; everything protocol-side is handled here.

pub mod chargepoint;
pub mod config;
pub mod infrastructure;
pub mod messages;
pub mod rpc;
pub mod support;

// Re-export commonly used types at crate root
pub use chargepoint::{ChargePoint, ChargePointEventsHandler, Connectors, OcppConfig};
pub use config::StackConfig;
pub use infrastructure::{init_database, Repositories};
pub use messages::{MessageDispatcher, MessageSender};
pub use rpc::{Frame, RpcClient, RpcClientConfig, RpcErrorCode};
pub use support::errors::{RpcError, StationError, StationResult};
pub use support::ShutdownSignal;

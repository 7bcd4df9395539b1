//! RPC layer: OCPP-J framing over WebSocket, client and server peers.
//!
//! The framing is symmetric: both sides send CALL frames and answer with
//! CALLRESULT or CALLERROR, correlated by the message id. The station is
//! normally the WebSocket *client* ([`client::RpcClient`]); the accept side
//! ([`server`]) exists for deployments where the station terminates the
//! socket (local controllers, test harnesses).

pub mod client;
pub mod frame;
pub mod server;

pub use client::{RpcClient, RpcClientConfig};
pub use frame::{Frame, FrameError, RpcErrorCode};

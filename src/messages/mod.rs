//! Message plumbing between the RPC layer and the charge point components.
//!
//! [`dispatcher::MessageDispatcher`] routes inbound CALLs to typed handlers;
//! [`sender::MessageSender`] issues typed outbound CALLs.

pub mod dispatcher;
pub mod sender;

pub use dispatcher::{CallFault, CallHandler, MessageDispatcher};
pub use sender::MessageSender;

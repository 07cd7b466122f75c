// kyc-realtime-kit/src/realtime/transport.rs

//! The transport seam between the connection task and the wire.
//!
//! A [`Connector`] opens authenticated [`Session`]s; a session yields
//! [`Frame`]s until the transport goes away. The connection task owns the
//! session for its whole life, so implementations do not need interior
//! locking.

use crate::realtime::types::{DisconnectReason, EventEnvelope};
use async_trait::async_trait;
use thiserror::Error;

/// Failures while opening or driving a transport session.
///
/// These never reach callers of the connection manager; they are logged and
/// broadcast as [`LifecycleEvent::ConnectError`](crate::realtime::types::LifecycleEvent).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("server rejected the credential: {0}")]
    Unauthorized(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One unit read from a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(EventEnvelope),
    /// The session ended with an explicit reason.
    Disconnect(DisconnectReason),
}

/// An open, authenticated transport session.
#[async_trait]
pub trait Session: Send {
    /// Waits for the next frame. `None` means the transport closed without
    /// a reason, which the connection task treats as `transport close`.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Closes the session from the client side.
    async fn close(&mut self);
}

/// Opens transport sessions for the connection task.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Opens a session to `url` authenticated with the bearer `token`.
    async fn open(&self, url: &str, token: &str) -> Result<Box<dyn Session>, TransportError>;
}

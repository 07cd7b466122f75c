// kyc-realtime-kit/src/realtime/types.rs

//! Shared types used by the connection manager, its background task and the
//! event router.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A unique identifier for a single realtime connection handle.
pub type ConnectionId = Uuid;

/// The name of a server-pushed event, e.g. `kyc:document-uploaded`.
pub type EventType = String;

/// A registered event handler. Handlers run on the connection task, in the
/// order the transport delivered the events.
pub type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Fixed reconnection policy: a bounded number of attempts separated by a
/// constant delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// How many reconnection attempts are made before giving up.
    pub max_attempts: u32,
    /// Delay between two attempts, in milliseconds.
    pub delay_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1_000,
        }
    }
}

/// Lifecycle state of a [`Connection`](crate::realtime::connection::Connection).
///
/// `Closed` and `Exhausted` are terminal. `Exhausted` is only left through a
/// new `connect()` on the manager, which replaces the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The first transport open is in flight.
    Connecting,
    Connected,
    /// The transport dropped and attempt `attempt` of `max` is pending.
    Reconnecting { attempt: u32, max: u32 },
    /// Every reconnection attempt failed.
    Exhausted,
    /// Closed locally.
    Closed,
}

impl ConnectionState {
    /// A live handle is one a repeated `connect()` hands back unchanged.
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

/// Why a transport session ended.
///
/// The string forms follow the reasons the portal server reports in its
/// close frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The server closed the session.
    IoServerDisconnect,
    /// The client closed the session.
    IoClientDisconnect,
    /// The client left the namespace.
    ClientNamespaceDisconnect,
    PingTimeout,
    TransportClose,
    TransportError,
    /// Any reason string this crate does not know. Treated as remote.
    Other(String),
}

impl DisconnectReason {
    /// Local closes never trigger an automatic reconnect.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            DisconnectReason::IoClientDisconnect | DisconnectReason::ClientNamespaceDisconnect
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::IoServerDisconnect => "io server disconnect",
            DisconnectReason::IoClientDisconnect => "io client disconnect",
            DisconnectReason::ClientNamespaceDisconnect => "client namespace disconnect",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::Other(reason) => reason,
        }
    }
}

impl FromStr for DisconnectReason {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "" | "io server disconnect" => DisconnectReason::IoServerDisconnect,
            "io client disconnect" => DisconnectReason::IoClientDisconnect,
            "client namespace disconnect" => DisconnectReason::ClientNamespaceDisconnect,
            "ping timeout" => DisconnectReason::PingTimeout,
            "transport close" => DisconnectReason::TransportClose,
            "transport error" => DisconnectReason::TransportError,
            other => DisconnectReason::Other(other.to_owned()),
        })
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics broadcast by a connection while it runs.
///
/// These are passive: nothing in the crate requires a listener, and transport
/// failures are reported here instead of being returned to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    Disconnected(DisconnectReason),
    ConnectError(String),
    ReconnectAttempt(u32),
    /// The transport came back after `n` attempts.
    Reconnected(u32),
    ReconnectFailed,
}

/// The payload pushed by the server for a named event type.
///
/// The router treats `payload` as opaque. On the wire an envelope is the JSON
/// object `{ "event": <name>, "data": <payload> }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "event")]
    pub event_type: EventType,
    #[serde(rename = "data", default)]
    pub payload: Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<EventType>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// The `entityId` field of the payload, when it is a string.
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("entityId").and_then(Value::as_str)
    }

    /// The `changeKind` field of the payload, when it is a string.
    pub fn change_kind(&self) -> Option<&str> {
        self.payload.get("changeKind").and_then(Value::as_str)
    }
}

// kyc-realtime-kit/src/realtime/mod.rs

//! The realtime connection layer: one connection per client, one handler per
//! event type.
//!
//! ```rust,no_run
//! # use kyc_realtime_kit::realtime::{manager::ConnectionManager, router::EventRouter, types::ReconnectPolicy};
//! # use kyc_realtime_kit::realtime::ws::WsConnector;
//! # use std::sync::Arc;
//! # #[tokio::main]
//! # async fn main() {
//! let manager = Arc::new(ConnectionManager::new(
//!     Arc::new(WsConnector::new()),
//!     "ws://localhost:5000/ws",
//!     ReconnectPolicy::default(),
//! ));
//! manager.connect("bearer-token");
//!
//! let router = EventRouter::new(Arc::clone(&manager));
//! router.subscribe("kyc:document-uploaded", |envelope| {
//!     println!("uploaded: {:?}", envelope.entity_id());
//! });
//! # }
//! ```

pub mod connection;
pub mod manager;
pub mod router;
pub mod subscriptions;
pub mod transport;
pub mod types;

#[cfg(feature = "ws")]
pub mod ws;

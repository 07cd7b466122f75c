//! # KYC Realtime Kit
//!
//! The realtime cache-coherency core of the KYC portal client. The server
//! pushes KYC events over one long-lived socket; this crate turns them into
//! precise invalidations of the client's cached queries, so every dashboard
//! shows fresh data without polling.
//!
//! ## Core Features
//!
//! - **`ConnectionManager`**: Owns the single realtime connection of the process and reconnects it with a fixed policy.
//! - **`EventRouter`**: One handler per event type, idempotent re-subscription, role-scoped unsubscribe.
//! - **`CacheCoordinator`**: Maps each event to the cache scope keys it affects and invalidates them.
//! - **`QueryCache`**: Scope-keyed query cache with request coalescing and hierarchical invalidation.
//! - **`Portal`**: Login, OTP verification and logout wired to all of the above.
//!
//! ## Getting Started
//!
//! See the `portal_watch` demo for a complete client, and the `realtime`
//! module for using the connection layer on its own.
//!
//! ---

pub mod auth;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod portal;
pub mod realtime;
pub mod role;

// The REST boundary types are always available; `RestClient` needs the "rest" feature.
pub mod api;

// Scripted transport for tests. Enabled for this crate's own tests or through "test-util".
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

/// Public prelude for convenience.
///
/// This allows users to import the most common types with a single `use` statement:
/// `use kyc_realtime_kit::prelude::*;`
pub mod prelude {
    pub use crate::cache::{
        coordinator::CacheCoordinator,
        key::ScopeKey,
        store::{Invalidate, QueryCache, QueryState},
    };
    pub use crate::config::PortalConfig;
    pub use crate::dashboard::Dashboard;
    pub use crate::events::KycEvent;
    pub use crate::portal::{Portal, PortalError};
    pub use crate::realtime::{
        manager::ConnectionManager,
        router::EventRouter,
        types::{ConnectionState, DisconnectReason, EventEnvelope, LifecycleEvent, ReconnectPolicy},
    };
    pub use crate::role::Role;

    #[cfg(feature = "rest")]
    pub use crate::api::RestClient;

    #[cfg(feature = "ws")]
    pub use crate::realtime::ws::WsConnector;
}

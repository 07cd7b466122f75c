// kyc-realtime-kit/src/realtime/router.rs

//! Routes server-pushed events on the current connection to registered
//! handlers.

use crate::realtime::{
    manager::ConnectionManager,
    types::EventEnvelope,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Registers and removes handlers on whatever connection the manager
/// currently holds.
///
/// Every event type has at most one handler. Registering again replaces the
/// old handler, which is what keeps a remounted view from seeing each event
/// twice.
#[derive(Debug, Clone)]
pub struct EventRouter {
    connections: Arc<ConnectionManager>,
}

impl EventRouter {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Installs `handler` for `event_type` on the current connection.
    ///
    /// Returns `false` (and logs) when there is no connection yet; the
    /// caller subscribes again once one exists.
    #[instrument(skip(self, handler))]
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> bool
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        let Some(connection) = self.connections.current() else {
            warn!("No realtime connection yet, subscription skipped.");
            return false;
        };

        let replaced = connection
            .subscriptions()
            .replace(event_type, Arc::new(handler));
        debug!(conn_id = %connection.id(), replaced, "Handler registered.");
        true
    }

    /// Like [`subscribe`](Self::subscribe), but delivers envelopes into a
    /// channel instead of a callback.
    pub fn subscribe_channel(&self, event_type: &str) -> Option<mpsc::UnboundedReceiver<EventEnvelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscribed = self.subscribe(event_type, move |envelope| {
            if tx.send(envelope.clone()).is_err() {
                debug!(event = %envelope.event_type, "Channel subscriber dropped.");
            }
        });
        subscribed.then_some(rx)
    }

    /// Removes the handlers for exactly `event_types`. Handlers registered
    /// for other event types, e.g. by another role's view, stay in place.
    #[instrument(skip_all)]
    pub fn unsubscribe_all<I, S>(&self, event_types: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match self.connections.current() {
            Some(connection) => {
                let removed = connection.subscriptions().remove_all(event_types);
                debug!(conn_id = %connection.id(), removed, "Handlers removed.");
                removed
            }
            None => 0,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }
}

// kyc-realtime-kit/src/realtime/manager.rs

//! Owns the single realtime connection of a portal client.

use crate::realtime::{
    connection::Connection,
    subscriptions::SubscriptionSet,
    transport::Connector,
    types::ReconnectPolicy,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, instrument};

/// Holds at most one non-disposed [`Connection`].
///
/// The manager is an ordinary value: construct one per client session (the
/// portal does this) and share it through an `Arc`. None of its operations
/// fail; transport problems show up as connection state and lifecycle
/// diagnostics instead.
///
/// Event handlers are registered with the manager's [`SubscriptionSet`],
/// which every connection it opens dispatches through. Replacing a
/// disconnected handle keeps them; [`disconnect`](Self::disconnect) drops
/// them.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    subscriptions: Arc<SubscriptionSet>,
    slot: Mutex<Option<Arc<Connection>>>,
    current_tx: watch::Sender<Option<Arc<Connection>>>,
}

impl ConnectionManager {
    /// # Arguments
    /// * `connector` - Opens transport sessions, e.g. a `WsConnector`.
    /// * `url` - The realtime endpoint.
    /// * `policy` - Applied to every connection this manager opens.
    pub fn new(connector: Arc<dyn Connector>, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            url: url.into(),
            policy,
            subscriptions: Arc::new(SubscriptionSet::default()),
            slot: Mutex::new(None),
            current_tx: watch::channel(None).0,
        }
    }

    /// Returns the live connection, or opens a new one authenticated with
    /// `token`.
    ///
    /// A live handle (connecting or connected) is returned unchanged and no
    /// transport activity happens, even if `token` differs. A handle that is
    /// reconnecting or exhausted is disposed and replaced.
    #[instrument(skip_all)]
    pub fn connect(&self, token: &str) -> Arc<Connection> {
        let mut slot = self.lock_slot();
        let replacement = slot.is_some();

        if let Some(existing) = slot.as_ref() {
            if existing.is_live() {
                debug!(conn_id = %existing.id(), "Reusing live realtime connection.");
                return Arc::clone(existing);
            }
            info!(
                conn_id = %existing.id(),
                state = ?existing.state(),
                "Disposing disconnected realtime connection."
            );
            existing.close();
        }

        let connection = Connection::open(
            Arc::clone(&self.connector),
            &self.url,
            token,
            self.policy,
            Arc::clone(&self.subscriptions),
            replacement,
        );
        info!(conn_id = %connection.id(), replacement, "Opening realtime connection.");
        *slot = Some(Arc::clone(&connection));
        self.current_tx.send_replace(Some(Arc::clone(&connection)));
        connection
    }

    /// Closes the held connection, clears the slot and drops every
    /// registered handler. Returns `false` when there was nothing to close.
    #[instrument(skip_all)]
    pub fn disconnect(&self) -> bool {
        let mut slot = self.lock_slot();
        match slot.take() {
            Some(connection) => {
                info!(conn_id = %connection.id(), "Closing realtime connection.");
                connection.close();
                self.subscriptions.clear();
                self.current_tx.send_replace(None);
                true
            }
            None => {
                debug!("No realtime connection to close.");
                false
            }
        }
    }

    /// The held connection, if any. `None` means nothing can be subscribed
    /// yet; it is not an error.
    pub fn current(&self) -> Option<Arc<Connection>> {
        self.lock_slot().as_ref().map(Arc::clone)
    }

    /// Observes which handle the manager holds. Changes on every new handle
    /// and on `disconnect`.
    pub fn watch_current(&self) -> watch::Receiver<Option<Arc<Connection>>> {
        self.current_tx.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    // The slot is only ever swapped, so a poisoned guard still holds a
    // consistent value.
    fn lock_slot(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url)
            .field("policy", &self.policy)
            .field("current", &self.current().map(|c| c.id()))
            .finish()
    }
}

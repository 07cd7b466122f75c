// kyc-realtime-kit/src/realtime/connection.rs

//! A single realtime connection handle and the background task that drives
//! it.
//!
//! The handle outlives individual transport sessions: when the server drops
//! the session the task reopens one under the same handle. The
//! [`SubscriptionSet`] belongs to the manager, so handlers also stay armed
//! when the manager replaces a handle that gave up.

use crate::realtime::{
    subscriptions::SubscriptionSet,
    transport::{Connector, Frame, Session},
    types::{ConnectionId, ConnectionState, DisconnectReason, LifecycleEvent, ReconnectPolicy},
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

const LIFECYCLE_CAPACITY: usize = 64;

/// A process-wide realtime connection. Only the
/// [`ConnectionManager`](crate::realtime::manager::ConnectionManager) creates
/// and disposes these.
pub struct Connection {
    id: ConnectionId,
    url: String,
    token: String,
    policy: ReconnectPolicy,
    subscriptions: Arc<SubscriptionSet>,
    /// Opened over a disconnected predecessor.
    replacement: bool,
    state_tx: watch::Sender<ConnectionState>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    shutdown_tx: watch::Sender<bool>,
}

impl Connection {
    /// Creates the handle and spawns its connection task. Must be called
    /// from within a Tokio runtime.
    pub(crate) fn open(
        connector: Arc<dyn Connector>,
        url: &str,
        token: &str,
        policy: ReconnectPolicy,
        subscriptions: Arc<SubscriptionSet>,
        replacement: bool,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            id: ConnectionId::new_v4(),
            url: url.to_owned(),
            token: token.to_owned(),
            policy,
            subscriptions,
            replacement,
            state_tx,
            lifecycle_tx,
            shutdown_tx,
        });

        let task_handle = Arc::clone(&connection);
        tokio::spawn(async move { task_handle.run(connector, shutdown_rx).await });

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// The event handlers this connection dispatches to.
    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Whether the manager opened this handle in place of one that was
    /// reconnecting, exhausted or closed. Events pushed in between were never
    /// seen by this client.
    pub fn is_replacement(&self) -> bool {
        self.replacement
    }

    /// A receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to lifecycle diagnostics. Events sent before this call are
    /// not replayed.
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Waits until the state satisfies `predicate` and returns that state.
    pub async fn wait_until<F>(&self, mut predicate: F) -> ConnectionState
    where
        F: FnMut(&ConnectionState) -> bool,
    {
        let mut rx = self.state_tx.subscribe();
        let reached = match rx.wait_for(|state| predicate(state)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        reached
    }

    /// Signals the task to close the session and stop. Idempotent.
    pub(crate) fn close(&self) {
        self.shutdown_tx.send_replace(true);
        // An exhausted task has already returned and will not observe the signal.
        if matches!(self.state(), ConnectionState::Exhausted) {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: LifecycleEvent) {
        // No listeners is fine; diagnostics are passive.
        let _ = self.lifecycle_tx.send(event);
    }

    /// Opens sessions and pumps frames until a local close or until the
    /// reconnect policy is exhausted.
    #[instrument(skip_all, fields(conn_id = %self.id, url = %self.url))]
    async fn run(self: Arc<Self>, connector: Arc<dyn Connector>, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                self.emit(LifecycleEvent::ReconnectAttempt(attempt));
            }

            let opened = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.finish_local();
                    return;
                }
                result = connector.open(&self.url, &self.token) => result,
            };

            match opened {
                Ok(mut session) => {
                    self.set_state(ConnectionState::Connected);
                    self.emit(LifecycleEvent::Connected);
                    if attempt > 0 {
                        info!(attempt, "Realtime connection re-established.");
                        self.emit(LifecycleEvent::Reconnected(attempt));
                    } else {
                        info!("Realtime connection established.");
                    }
                    attempt = 0;

                    let reason = self.pump(session.as_mut(), &mut shutdown).await;
                    self.emit(LifecycleEvent::Disconnected(reason.clone()));
                    if reason.is_local() {
                        info!(%reason, "Realtime connection closed locally.");
                        self.set_state(ConnectionState::Closed);
                        return;
                    }
                    warn!(%reason, "Realtime connection lost.");
                }
                Err(e) => {
                    warn!(error = %e, attempt, "Failed to open realtime connection.");
                    self.emit(LifecycleEvent::ConnectError(e.to_string()));
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                warn!(
                    max_attempts = self.policy.max_attempts,
                    "Reconnection attempts exhausted. Connection is idle."
                );
                self.set_state(ConnectionState::Exhausted);
                self.emit(LifecycleEvent::ReconnectFailed);
                if *self.shutdown_tx.borrow() {
                    self.set_state(ConnectionState::Closed);
                }
                return;
            }

            self.set_state(ConnectionState::Reconnecting {
                attempt,
                max: self.policy.max_attempts,
            });
            debug!(attempt, delay = ?self.policy.delay(), "Waiting before reconnecting.");

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.finish_local();
                    return;
                }
                _ = tokio::time::sleep(self.policy.delay()) => {}
            }
        }
    }

    /// Dispatches frames from one session. Returns why the session ended.
    async fn pump(
        &self,
        session: &mut dyn Session,
        shutdown: &mut watch::Receiver<bool>,
    ) -> DisconnectReason {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    session.close().await;
                    return DisconnectReason::IoClientDisconnect;
                }
                frame = session.next_frame() => match frame {
                    Some(Frame::Event(envelope)) => {
                        debug!(event = %envelope.event_type, "Dispatching event.");
                        self.subscriptions.dispatch(&envelope);
                    }
                    Some(Frame::Disconnect(reason)) => return reason,
                    None => return DisconnectReason::TransportClose,
                },
            }
        }
    }

    fn finish_local(&self) {
        info!("Realtime connection disposed while no session was open.");
        self.set_state(ConnectionState::Closed);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("replacement", &self.replacement)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

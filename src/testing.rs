// kyc-realtime-kit/src/testing.rs

//! A scripted in-memory transport for driving the connection task without a
//! network.

use crate::realtime::{
    transport::{Connector, Frame, Session, TransportError},
    types::{DisconnectReason, EventEnvelope},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Opens [`MockSession`]s and lets a test push frames into the most recent
/// one.
#[derive(Debug, Default)]
pub struct MockConnector {
    refuse: AtomicBool,
    opens: AtomicUsize,
    local_closes: Arc<AtomicUsize>,
    tokens: Mutex<Vec<String>>,
    current: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following `open` fail until switched back.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of open attempts, refused ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Tokens presented to `open`, in order.
    pub fn tokens(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }

    pub fn last_token(&self) -> Option<String> {
        lock(&self.tokens).last().cloned()
    }

    /// How many sessions were closed from the client side.
    pub fn local_closes(&self) -> usize {
        self.local_closes.load(Ordering::SeqCst)
    }

    /// Queues an event on the open session. Returns `false` when no session
    /// is open.
    pub fn push(&self, event_type: &str, payload: Value) -> bool {
        self.send(Frame::Event(EventEnvelope::new(event_type, payload)))
    }

    /// Ends the open session with `reason`, after any queued events.
    pub fn drop_session(&self, reason: DisconnectReason) -> bool {
        let sent = self.send(Frame::Disconnect(reason));
        lock(&self.current).take();
        sent
    }

    fn send(&self, frame: Frame) -> bool {
        match lock(&self.current).as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, _url: &str, token: &str) -> Result<Box<dyn Session>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        lock(&self.tokens).push(token.to_owned());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.current) = Some(tx);
        Ok(Box::new(MockSession {
            rx,
            local_closes: Arc::clone(&self.local_closes),
        }))
    }
}

/// The session half of [`MockConnector`].
#[derive(Debug)]
pub struct MockSession {
    rx: mpsc::UnboundedReceiver<Frame>,
    local_closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Session for MockSession {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    async fn close(&mut self) {
        self.local_closes.fetch_add(1, Ordering::SeqCst);
        self.rx.close();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
static TRACING: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kyc_realtime_kit=debug".into()),
        )
        .with_test_writer()
        .try_init();
});

/// Installs the test log subscriber once per test binary.
#[cfg(test)]
pub(crate) fn init_tracing() {
    once_cell::sync::Lazy::force(&TRACING);
}

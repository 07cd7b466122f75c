// kyc-realtime-kit/src/realtime/subscriptions.rs

//! The handler registry shared by every connection a manager opens.

use crate::realtime::types::{EventEnvelope, EventType, Handler};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Maps each event type to exactly one handler.
///
/// `DashMap` makes replacement and removal atomic per event type, so a view
/// that remounts swaps its handler in a single step and never receives the
/// same event twice.
#[derive(Default)]
pub struct SubscriptionSet {
    handlers: DashMap<EventType, Handler>,
}

impl SubscriptionSet {
    /// Installs `handler` for `event_type`. Returns `true` when an earlier
    /// handler was replaced.
    pub fn replace(&self, event_type: &str, handler: Handler) -> bool {
        self.handlers
            .insert(event_type.to_owned(), handler)
            .is_some()
    }

    /// Removes the handlers of exactly the given event types and returns how
    /// many were present.
    pub fn remove_all<I, S>(&self, event_types: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        event_types
            .into_iter()
            .filter(|event_type| self.handlers.remove(event_type.as_ref()).is_some())
            .count()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Drops every handler. Called when the manager disposes its
    /// connection for good.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sorted snapshot of the registered event types.
    pub fn event_types(&self) -> Vec<EventType> {
        let mut types: Vec<EventType> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Runs the handler registered for the envelope's event type, if any.
    ///
    /// The handler is cloned out of the map first so no shard lock is held
    /// while it runs; a handler may itself subscribe or unsubscribe.
    pub(crate) fn dispatch(&self, envelope: &EventEnvelope) -> bool {
        let handler = self
            .handlers
            .get(&envelope.event_type)
            .map(|entry| Arc::clone(entry.value()));

        match handler {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => {
                debug!(event = %envelope.event_type, "No handler registered, event dropped.");
                false
            }
        }
    }
}

impl fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("event_types", &self.event_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &EventEnvelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn replacing_a_handler_keeps_a_single_delivery() {
        let set = SubscriptionSet::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        assert!(!set.replace("kyc:document-uploaded", counting(&first)));
        assert!(set.replace("kyc:document-uploaded", counting(&second)));

        set.dispatch(&EventEnvelope::new("kyc:document-uploaded", Value::Null));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_all_leaves_other_event_types_alone() {
        let set = SubscriptionSet::default();
        let counter = Arc::new(AtomicUsize::new(0));
        for event in ["a", "b", "c"] {
            set.replace(event, counting(&counter));
        }

        let removed = set.remove_all(["a", "b", "missing"]);

        assert_eq!(removed, 2);
        assert_eq!(set.event_types(), vec!["c".to_string()]);
        assert!(set.contains("c"));
        assert!(!set.contains("a"));
        assert!(!set.dispatch(&EventEnvelope::new("a", Value::Null)));
        assert!(set.dispatch(&EventEnvelope::new("c", Value::Null)));

        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains("c"));
    }
}

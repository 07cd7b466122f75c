// kyc-realtime-kit/src/cache/coordinator.rs

//! Bridges realtime events to query cache invalidation.

use crate::cache::{key::ScopeKey, store::Invalidate};
use crate::events::KycEvent;
use crate::realtime::types::EventEnvelope;
use crate::role::Role;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const ADMIN_SCOPES: &[Role] = &[Role::Admin];
const CLIENT_SCOPES: &[Role] = &[Role::Client, Role::Triparty];

/// Turns pushed events into invalidations of the affected scope keys.
///
/// The coordinator only marks data stale; whoever reads the key next does
/// the refetch and owns any error it produces.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: Arc<dyn Invalidate>,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn Invalidate>) -> Self {
        Self { store }
    }

    /// The keys an event invalidates.
    ///
    /// Entity-scoped keys need the envelope's `entityId` and are skipped when
    /// it is absent.
    pub fn scope_keys(event: KycEvent, envelope: &EventEnvelope) -> Vec<ScopeKey> {
        let (role_scopes, admin_entity): (&[Role], bool) = match event {
            KycEvent::DocumentUploaded | KycEvent::SubmissionUpdated => (ADMIN_SCOPES, true),
            KycEvent::DocumentApproved | KycEvent::DocumentRejected => (CLIENT_SCOPES, true),
            KycEvent::StatusUpdated => (CLIENT_SCOPES, false),
        };

        let mut keys: Vec<ScopeKey> = role_scopes.iter().map(|role| role.scope()).collect();
        if admin_entity {
            if let Some(entity_id) = envelope.entity_id() {
                keys.push(Role::Admin.scope().child(entity_id));
            }
        }
        keys
    }

    /// Invalidates every key mapped from `event_type`. Unknown event types
    /// are ignored. Returns the number of keys invalidated.
    #[instrument(skip(self, envelope), fields(entity_id = ?envelope.entity_id()))]
    pub fn on_event(&self, event_type: &str, envelope: &EventEnvelope) -> usize {
        let Some(event) = KycEvent::from_name(event_type) else {
            debug!("Unmapped event type, nothing to invalidate.");
            return 0;
        };

        let keys = Self::scope_keys(event, envelope);
        for key in &keys {
            let touched = self.store.invalidate(key);
            debug!(%key, touched, "Scope invalidated.");
        }
        keys.len()
    }

    /// Events may have been missed while the connection was down, so every
    /// KYC query is marked stale.
    pub fn on_reconnect(&self) {
        let touched = self.store.invalidate(&ScopeKey::kyc());
        info!(touched, "Realtime connection restored, KYC cache marked stale.");
    }
}

impl fmt::Debug for CacheCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheCoordinator").finish_non_exhaustive()
    }
}

// kyc-realtime-kit/src/dashboard.rs

//! Subscription lifecycle of a mounted role dashboard.

use crate::cache::coordinator::CacheCoordinator;
use crate::realtime::router::EventRouter;
use crate::role::Role;
use tracing::{debug, info, instrument};

/// A mounted dashboard view.
///
/// Mounting registers one handler per event in the role's set, each
/// forwarding to the cache coordinator. The handlers stay registered when
/// the manager replaces a disconnected connection. Unmounting (or dropping)
/// removes exactly those event types and leaves the shared connection open.
#[derive(Debug)]
pub struct Dashboard {
    role: Role,
    router: EventRouter,
    coordinator: CacheCoordinator,
    mounted: bool,
}

impl Dashboard {
    #[instrument(skip(router, coordinator))]
    pub fn mount(role: Role, router: EventRouter, coordinator: CacheCoordinator) -> Self {
        let dashboard = Self {
            role,
            router,
            coordinator,
            mounted: true,
        };
        let armed = dashboard.refresh();
        info!(armed, route = role.dashboard_route(), "Dashboard mounted.");
        dashboard
    }

    /// Registers the role's handlers again and returns how many were
    /// registered.
    ///
    /// Needed when the mount happened before any connection existed, or
    /// after `disconnect` dropped every handler. Replacement semantics make
    /// this safe to repeat.
    pub fn refresh(&self) -> usize {
        let mut armed = 0;
        for event in self.role.event_set() {
            let name = event.name();
            let coordinator = self.coordinator.clone();
            if self.router.subscribe(name, move |envelope| {
                coordinator.on_event(name, envelope);
            }) {
                armed += 1;
            }
        }
        armed
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn route(&self) -> &'static str {
        self.role.dashboard_route()
    }

    /// How many of the role's event types have a handler on the live
    /// connection right now.
    pub fn armed(&self) -> usize {
        let Some(connection) = self.router.connections().current() else {
            return 0;
        };
        self.role
            .event_set()
            .iter()
            .filter(|event| connection.subscriptions().contains(event.name()))
            .count()
    }

    pub fn unmount(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        let removed = self
            .router
            .unsubscribe_all(self.role.event_set().iter().map(|event| event.name()));
        debug!(role = %self.role, removed, "Dashboard unmounted.");
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::ScopeKey;
    use crate::cache::store::{QueryCache, QueryState};
    use crate::realtime::{
        manager::ConnectionManager,
        types::{ConnectionState, DisconnectReason, ReconnectPolicy},
    };
    use crate::testing::{MockConnector, init_tracing};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Fixture {
        connector: Arc<MockConnector>,
        router: EventRouter,
        cache: Arc<QueryCache>,
        coordinator: CacheCoordinator,
    }

    async fn fixture() -> Fixture {
        let connector = MockConnector::new();
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            "ws://portal.test/ws",
            ReconnectPolicy::default(),
        ));
        manager
            .connect("token")
            .wait_until(|s| *s == ConnectionState::Connected)
            .await;
        let cache = Arc::new(QueryCache::new());
        Fixture {
            connector,
            router: EventRouter::new(manager),
            coordinator: CacheCoordinator::new(cache.clone()),
            cache,
        }
    }

    async fn warm(cache: &QueryCache, key: ScopeKey) {
        cache
            .read(key, || async { Ok::<_, anyhow::Error>("cached".to_string()) })
            .await
            .unwrap();
    }

    /// Pushes a marker event and waits until the connection task delivered it,
    /// which means every event pushed before it was dispatched too.
    async fn flush(fixture: &Fixture) {
        let mut marker = fixture.router.subscribe_channel("test:flush").unwrap();
        fixture.connector.push("test:flush", json!({}));
        timeout(Duration::from_secs(1), marker.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn admin_dashboard_refreshes_list_and_detail_on_upload() {
        init_tracing();
        let fixture = fixture().await;
        let list = Role::Admin.scope();
        let detail = list.child("co123");
        warm(&fixture.cache, list.clone()).await;
        warm(&fixture.cache, detail.clone()).await;

        let dashboard = Dashboard::mount(
            Role::Admin,
            fixture.router.clone(),
            fixture.coordinator.clone(),
        );
        assert_eq!(dashboard.armed(), 2);

        fixture
            .connector
            .push("kyc:document-uploaded", json!({ "entityId": "co123" }));
        flush(&fixture).await;

        assert!(matches!(fixture.cache.peek::<String>(&list), QueryState::Stale(_)));
        assert!(matches!(fixture.cache.peek::<String>(&detail), QueryState::Stale(_)));
    }

    #[tokio::test]
    async fn unmounting_client_view_keeps_admin_handlers() {
        init_tracing();
        let fixture = fixture().await;
        let admin = Dashboard::mount(
            Role::Admin,
            fixture.router.clone(),
            fixture.coordinator.clone(),
        );
        let client = Dashboard::mount(
            Role::Client,
            fixture.router.clone(),
            fixture.coordinator.clone(),
        );

        client.unmount();

        let connection = fixture.router.connections().current().unwrap();
        let registered = connection.subscriptions().event_types();
        assert_eq!(
            registered,
            vec![
                "kyc:document-uploaded".to_string(),
                "kyc:submission-updated".to_string(),
            ]
        );
        assert!(connection.is_live());
        drop(admin);
        assert!(connection.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn remounting_does_not_double_invalidate() {
        init_tracing();
        let fixture = fixture().await;
        let first = Dashboard::mount(
            Role::Client,
            fixture.router.clone(),
            fixture.coordinator.clone(),
        );
        // The view remounts without the earlier instance being torn down.
        std::mem::forget(first);
        let _second = Dashboard::mount(
            Role::Client,
            fixture.router.clone(),
            fixture.coordinator.clone(),
        );

        let before = fixture.cache.stats().invalidations;
        fixture
            .connector
            .push("kyc:status-updated", json!({ "changeKind": "verified" }));
        flush(&fixture).await;

        // status-updated maps to two keys; one handler means two invalidations.
        assert_eq!(fixture.cache.stats().invalidations - before, 2);
    }

    #[tokio::test]
    async fn mount_before_connect_arms_nothing_until_refresh() {
        init_tracing();
        let connector = MockConnector::new();
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            "ws://portal.test/ws",
            ReconnectPolicy::default(),
        ));
        let cache = Arc::new(QueryCache::new());
        let dashboard = Dashboard::mount(
            Role::Triparty,
            EventRouter::new(Arc::clone(&manager)),
            CacheCoordinator::new(cache),
        );
        assert_eq!(dashboard.armed(), 0);

        manager.connect("token");
        assert_eq!(dashboard.armed(), 0);
        assert_eq!(dashboard.refresh(), 3);
        assert_eq!(dashboard.armed(), 3);
        assert_eq!(dashboard.route(), "/triparty/dashboard");
    }

    #[tokio::test(start_paused = true)]
    async fn mounted_view_keeps_receiving_after_connection_replacement() {
        init_tracing();
        let connector = MockConnector::new();
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            "ws://portal.test/ws",
            ReconnectPolicy::new(1, Duration::from_millis(100)),
        ));
        let first = manager.connect("token");
        first.wait_until(|s| *s == ConnectionState::Connected).await;

        let cache = Arc::new(QueryCache::new());
        let router = EventRouter::new(Arc::clone(&manager));
        let dashboard = Dashboard::mount(
            Role::Client,
            router.clone(),
            CacheCoordinator::new(cache.clone()),
        );
        warm(&cache, Role::Client.scope()).await;

        connector.refuse_connections(true);
        connector.drop_session(DisconnectReason::IoServerDisconnect);
        first.wait_until(|s| *s == ConnectionState::Exhausted).await;
        connector.refuse_connections(false);

        let second = manager.connect("token");
        second.wait_until(|s| *s == ConnectionState::Connected).await;
        assert_ne!(first.id(), second.id());
        assert_eq!(dashboard.armed(), 3);

        let mut marker = router.subscribe_channel("test:flush").unwrap();
        connector.push("kyc:status-updated", json!({ "changeKind": "verified" }));
        connector.push("test:flush", json!({}));
        timeout(Duration::from_secs(1), marker.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            cache.peek::<String>(&Role::Client.scope()),
            QueryState::Stale(_)
        ));

        manager.disconnect();
        assert_eq!(dashboard.armed(), 0);
    }
}

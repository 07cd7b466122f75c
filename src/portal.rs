// kyc-realtime-kit/src/portal.rs

//! The portal session: authentication, the shared realtime connection, and
//! cached KYC reads that stay coherent with server-pushed events.

use crate::api::{
    ApiError, DocumentUpload, KycApi, KycDocument, KycStatus, LoginOutcome, ReviewDecision,
    Submission, TripartyOverview,
};
use crate::auth::{Credential, CredentialError, CredentialStore};
use crate::cache::{
    coordinator::CacheCoordinator,
    key::ScopeKey,
    store::{Invalidate, QueryCache},
};
use crate::config::PortalConfig;
use crate::dashboard::Dashboard;
use crate::realtime::{
    connection::Connection,
    manager::ConnectionManager,
    router::EventRouter,
    transport::Connector,
    types::{ConnectionState, LifecycleEvent},
};
use crate::role::Role;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum PortalError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("not signed in")]
    NotAuthenticated,
    /// A cached read failed. Every reader that joined the fetch sees the same
    /// error.
    #[error("query failed: {0}")]
    Query(Arc<anyhow::Error>),
}

impl PortalError {
    /// The message the server attached to a rejected request.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            PortalError::Api(e) => e.server_message(),
            PortalError::Query(e) => e.downcast_ref::<ApiError>().and_then(ApiError::server_message),
            _ => None,
        }
    }
}

/// A signed-in (or signed-out) portal client.
///
/// The portal owns the one [`ConnectionManager`] of the process. Logging in
/// connects it, logging out disposes it. Reads go through the
/// [`QueryCache`]; mounted dashboards keep the cache coherent with pushed
/// events, and the portal itself marks every KYC query stale whenever events
/// may have been missed: after an automatic reconnect, and when a replacement
/// connection first comes up.
pub struct Portal<A: KycApi> {
    api: Arc<A>,
    credentials: Arc<dyn CredentialStore>,
    connections: Arc<ConnectionManager>,
    router: EventRouter,
    cache: Arc<QueryCache>,
    coordinator: CacheCoordinator,
    session: Mutex<Option<Credential>>,
    coherence_task: Mutex<Option<JoinHandle<()>>>,
}

impl<A: KycApi> Portal<A> {
    pub fn new(
        api: A,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        config: &PortalConfig,
    ) -> Self {
        let cache = Arc::new(match config.fetch_timeout() {
            Some(limit) => QueryCache::with_timeout(limit),
            None => QueryCache::new(),
        });
        let connections = Arc::new(ConnectionManager::new(
            connector,
            config.socket_url.clone(),
            config.reconnect,
        ));

        Self {
            api: Arc::new(api),
            credentials,
            router: EventRouter::new(Arc::clone(&connections)),
            connections,
            coordinator: CacheCoordinator::new(cache.clone()),
            cache,
            session: Mutex::new(None),
            coherence_task: Mutex::new(None),
        }
    }

    // --- Session ---

    /// Submits credentials. An `Authenticated` outcome stores the token and
    /// connects; `OtpRequired` leaves the portal signed out until
    /// [`verify_otp`](Self::verify_otp).
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, PortalError> {
        let outcome = self.api.login(email, password).await?;
        match &outcome {
            LoginOutcome::Authenticated(credential) => self.establish(credential)?,
            LoginOutcome::OtpRequired { .. } => info!("One-time password required."),
        }
        Ok(outcome)
    }

    #[instrument(skip(self, otp))]
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<Credential, PortalError> {
        let credential = self.api.verify_otp(email, otp).await?;
        self.establish(&credential)?;
        Ok(credential)
    }

    /// Resumes a persisted session. Returns the restored role, or `None` when
    /// no credential is stored.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Result<Option<Role>, PortalError> {
        let Some(credential) = self.credentials.get()? else {
            debug!("No stored credential.");
            return Ok(None);
        };
        let role = credential.role;
        *lock(&self.session) = Some(credential.clone());
        self.connect(&credential.token);
        info!(%role, "Session restored.");
        Ok(Some(role))
    }

    /// Disposes the connection, forgets the credential and drops all cached
    /// data.
    #[instrument(skip(self))]
    pub fn logout(&self) -> Result<(), PortalError> {
        self.connections.disconnect();
        lock(&self.session).take();
        self.cache.clear();
        self.credentials.clear()?;
        info!("Signed out.");
        Ok(())
    }

    pub fn role(&self) -> Option<Role> {
        lock(&self.session).as_ref().map(|credential| credential.role)
    }

    /// The dashboard route of the signed-in role.
    pub fn landing_route(&self) -> Option<&'static str> {
        self.role().map(Role::dashboard_route)
    }

    /// Re-establishes the realtime connection with the session token.
    ///
    /// A live connection is returned as is. One the reconnect policy gave up
    /// on is replaced; mounted dashboards keep their handlers and every KYC
    /// query is marked stale once the new connection is up.
    pub fn reconnect(&self) -> Result<Arc<Connection>, PortalError> {
        let token = self.credential()?.token;
        Ok(self.connect(&token))
    }

    /// Mounts the signed-in role's dashboard.
    ///
    /// The connection is re-established first if the reconnect policy gave up
    /// on it, so the new handlers land on a connection that can deliver.
    pub fn mount_dashboard(&self) -> Result<Dashboard, PortalError> {
        let credential = self.credential()?;
        self.connect(&credential.token);
        Ok(Dashboard::mount(
            credential.role,
            self.router.clone(),
            self.coordinator.clone(),
        ))
    }

    // --- Cached reads ---

    pub async fn client_status(&self) -> Result<Arc<KycStatus>, PortalError> {
        self.cached(Role::Client.scope(), |api, token| async move {
            api.client_status(&token).await
        })
        .await
    }

    pub async fn admin_submissions(&self) -> Result<Arc<Vec<Submission>>, PortalError> {
        self.cached(Role::Admin.scope(), |api, token| async move {
            api.admin_submissions(&token).await
        })
        .await
    }

    pub async fn admin_submission(&self, id: &str) -> Result<Arc<Submission>, PortalError> {
        let id = id.to_owned();
        self.cached(Role::Admin.scope().child(id.clone()), move |api, token| async move {
            api.admin_submission(&token, &id).await
        })
        .await
    }

    pub async fn triparty_overview(&self) -> Result<Arc<TripartyOverview>, PortalError> {
        self.cached(Role::Triparty.scope(), |api, token| async move {
            api.triparty_overview(&token).await
        })
        .await
    }

    // --- Mutations ---

    /// Uploads a document and marks the client's queries stale.
    #[instrument(skip(self, upload), fields(doc_type = %upload.doc_type))]
    pub async fn upload_document(&self, upload: DocumentUpload) -> Result<KycDocument, PortalError> {
        let token = self.credential()?.token;
        let document = self.api.upload_document(&token, upload).await?;
        self.cache.invalidate(&Role::Client.scope());
        Ok(document)
    }

    /// Records a review decision and marks the admin list and every admin
    /// detail stale.
    #[instrument(skip(self))]
    pub async fn review_document(
        &self,
        document_id: &str,
        decision: ReviewDecision,
    ) -> Result<KycDocument, PortalError> {
        let token = self.credential()?.token;
        let document = self.api.review_document(&token, document_id, &decision).await?;
        self.cache.invalidate(&Role::Admin.scope());
        Ok(document)
    }

    // --- Accessors ---

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    // --- Internals ---

    fn credential(&self) -> Result<Credential, PortalError> {
        lock(&self.session).clone().ok_or(PortalError::NotAuthenticated)
    }

    fn establish(&self, credential: &Credential) -> Result<(), PortalError> {
        self.credentials.set(credential)?;
        *lock(&self.session) = Some(credential.clone());
        self.connect(&credential.token);
        info!(role = %credential.role, route = credential.role.dashboard_route(), "Signed in.");
        Ok(())
    }

    fn connect(&self, token: &str) -> Arc<Connection> {
        let connection = self.connections.connect(token);
        let mut task = lock(&self.coherence_task);
        if task.is_none() {
            *task = Some(tokio::spawn(keep_coherent(
                self.connections.watch_current(),
                self.coordinator.clone(),
            )));
        }
        connection
    }

    async fn cached<T, F, Fut>(&self, key: ScopeKey, call: F) -> Result<Arc<T>, PortalError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Arc<A>, String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let token = self.credential()?.token;
        let api = Arc::clone(&self.api);
        self.cache
            .read(key, move || async move { call(api, token).await.map_err(anyhow::Error::from) })
            .await
            .map_err(PortalError::Query)
    }
}

#[cfg(all(feature = "ws", feature = "rest"))]
impl Portal<crate::api::RestClient> {
    /// A portal talking to the configured REST API and socket endpoint.
    pub fn from_config(config: &PortalConfig) -> Self {
        use crate::auth::{FileCredentialStore, MemoryCredentialStore};

        let credentials: Arc<dyn CredentialStore> = match &config.credential_path {
            Some(path) => Arc::new(FileCredentialStore::new(path.clone())),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        Self::new(
            crate::api::RestClient::new(config.api_base_url.clone()),
            Arc::new(crate::realtime::ws::WsConnector::new()),
            credentials,
            config,
        )
    }
}

impl<A: KycApi> Drop for Portal<A> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.coherence_task).take() {
            task.abort();
        }
    }
}

impl<A: KycApi> fmt::Debug for Portal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Portal")
            .field("role", &self.role())
            .field("connections", &self.connections)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Follows whichever connection the manager holds and invalidates every KYC
/// query when events may have been missed.
///
/// That is the case after an automatic reconnect of one handle, and on the
/// first `Connected` of a handle that replaced a disconnected one. A handle
/// opened after `disconnect` starts from an empty cache and needs nothing.
async fn keep_coherent(
    mut current: watch::Receiver<Option<Arc<Connection>>>,
    coordinator: CacheCoordinator,
) {
    loop {
        let held = current.borrow_and_update().clone();
        let Some(connection) = held else {
            if current.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut lifecycle = connection.lifecycle();
        let mut resume_pending = connection.is_replacement();
        if resume_pending && connection.state() == ConnectionState::Connected {
            debug!(conn_id = %connection.id(), "Replacement connection up.");
            coordinator.on_reconnect();
            resume_pending = false;
        }

        loop {
            tokio::select! {
                changed = current.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                event = lifecycle.recv() => match event {
                    Ok(LifecycleEvent::Connected) if resume_pending => {
                        debug!(conn_id = %connection.id(), "Replacement connection up.");
                        coordinator.on_reconnect();
                        resume_pending = false;
                    }
                    Ok(LifecycleEvent::Reconnected(_)) => coordinator.on_reconnect(),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Lifecycle events skipped, assuming a reconnect.");
                        coordinator.on_reconnect();
                        resume_pending = false;
                    }
                    Err(RecvError::Closed) => {
                        if current.changed().await.is_err() {
                            return;
                        }
                        break;
                    }
                },
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

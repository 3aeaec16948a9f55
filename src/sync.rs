//! Collection replacement fan-out: sibling contexts, storage fallback and
//! debounced backend writes

use crate::backend::{BackendClient, BackendSnapshot};
use crate::config::Config;
use crate::errors::{NavError, Result};
use crate::models::{CollectionKind, SyncUpdate};
use crate::observer::{Observer, ObserverRegistry, Subscription};
use crate::store::{BACKEND_CONFIG_KEY, LocalStore, StorageEvent};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const SYNC_CHANNEL_NAME: &str = "service-nav-sync";

/// Completes once the backend accepted (or refused) the update
pub type SyncFuture = BoxFuture<'static, Result<()>>;

/// A sync update tagged with the context that sent it
#[derive(Clone, Debug, PartialEq)]
pub struct SyncEnvelope {
    pub origin: String,
    pub update: SyncUpdate,
}

/// Broadcast channel shared by every context of one client
#[derive(Clone, Debug)]
pub struct SyncChannel {
    name: String,
    sender: broadcast::Sender<SyncEnvelope>,
}

impl SyncChannel {
    pub fn new(capacity: usize) -> Self {
        Self::named(SYNC_CHANNEL_NAME, capacity)
    }

    pub fn named(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn publish(&self, envelope: SyncEnvelope) {
        // Nobody listening is fine
        let _ = self.sender.send(envelope);
    }

    fn subscribe(&self) -> broadcast::Receiver<SyncEnvelope> {
        self.sender.subscribe()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackendConfigRecord {
    url: String,
}

struct SyncInner {
    context_id: String,
    store: LocalStore,
    channel: SyncChannel,
    backend: RwLock<Option<BackendClient>>,
    http_timeout: Duration,
    debounce: Duration,
    observers: ObserverRegistry<SyncUpdate>,
    pending: Mutex<[PendingSends; 2]>,
    sequences: [AtomicU64; 2],
}

/// Debounce state of one collection kind
#[derive(Default)]
struct PendingSends {
    /// Timer of the send waiting out its debounce window
    timer: Option<CancellationToken>,
    /// Callers waiting for the send that carries their update
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl SyncInner {
    fn backend(&self) -> Option<BackendClient> {
        self.backend.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn latest_sequence(&self, kind: CollectionKind) -> u64 {
        self.sequences[kind.index()].load(Ordering::SeqCst)
    }

    fn handle_storage_event(&self, event: StorageEvent) {
        let Some(kind) = CollectionKind::from_storage_key(&event.key) else {
            return;
        };
        let Some(raw) = event.new_value else {
            return;
        };

        match SyncUpdate::from_collection_json(kind, &raw) {
            Ok(update) => {
                debug!("Applying {} from storage change by {}", kind, event.origin);
                self.observers.notify(&update);
            }
            Err(e) => warn!("Ignoring undecodable {} storage change: {}", kind, e),
        }
    }
}

/// Relays collection replacements to sibling contexts and the backend
pub struct SyncBroadcaster {
    inner: Arc<SyncInner>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncBroadcaster {
    /// Create a broadcaster for the context owning `store`.
    ///
    /// Spawns the channel and storage listeners, so it must be called inside a
    /// tokio runtime.
    pub fn new(store: LocalStore, channel: SyncChannel, config: &Config) -> Result<Self> {
        let backend_url = match store.get_opt::<BackendConfigRecord>(BACKEND_CONFIG_KEY) {
            Some(record) => Some(record.url),
            None => config.backend_url.clone(),
        };

        let backend = match backend_url {
            Some(url) => Some(BackendClient::new(url, config.http_timeout)?),
            None => None,
        };

        let inner = Arc::new(SyncInner {
            context_id: store.context_id().to_string(),
            store,
            channel,
            backend: RwLock::new(backend),
            http_timeout: config.http_timeout,
            debounce: config.sync_debounce,
            observers: ObserverRegistry::new(),
            pending: Mutex::new(Default::default()),
            sequences: [AtomicU64::new(0), AtomicU64::new(0)],
        });

        let broadcaster = Self {
            inner,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };
        broadcaster.spawn_listeners();

        info!(
            "Sync broadcaster ready for context {} on channel {} (backend: {})",
            broadcaster.inner.context_id,
            broadcaster.inner.channel.name(),
            broadcaster.backend_url().unwrap_or_else(|| "none".to_string())
        );

        Ok(broadcaster)
    }

    fn spawn_listeners(&self) {
        let mut receiver = self.inner.channel.subscribe();
        let inner = Arc::clone(&self.inner);
        let token = self.shutdown.clone();
        let channel_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    message = receiver.recv() => match message {
                        Ok(envelope) if envelope.origin == inner.context_id => continue,
                        Ok(envelope) => {
                            debug!(
                                "Received {} ({} items) from context {}",
                                envelope.update.kind(),
                                envelope.update.len(),
                                envelope.origin
                            );
                            inner.observers.notify(&envelope.update);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Sync channel lagged, skipped {} updates", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let mut listener = self.inner.store.subscribe();
        let inner = Arc::clone(&self.inner);
        let token = self.shutdown.clone();
        let storage_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = listener.recv() => match event {
                        Some(event) => inner.handle_storage_event(event),
                        None => break,
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(channel_task);
        tasks.push(storage_task);
    }

    pub fn context_id(&self) -> &str {
        &self.inner.context_id
    }

    /// Attach an observer for updates coming from other contexts
    pub fn subscribe(&self, observer: Arc<dyn Observer<SyncUpdate>>) -> Subscription {
        self.inner.observers.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&SyncUpdate) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe_fn(f)
    }

    pub fn backend_url(&self) -> Option<String> {
        self.inner.backend().map(|b| b.base_url().to_string())
    }

    pub fn has_backend(&self) -> bool {
        self.inner.backend().is_some()
    }

    /// Point the broadcaster at a new backend, or none, and remember the choice
    pub fn set_backend_url(&self, url: Option<&str>) -> Result<()> {
        let backend = match url {
            Some(url) => {
                let client = BackendClient::new(url, self.inner.http_timeout)?;
                self.inner.store.set(
                    BACKEND_CONFIG_KEY,
                    &BackendConfigRecord {
                        url: client.base_url().to_string(),
                    },
                )?;
                Some(client)
            }
            None => {
                self.inner.store.remove(BACKEND_CONFIG_KEY)?;
                None
            }
        };

        info!("Backend set to {}", url.unwrap_or("none"));
        *self.inner.backend.write().unwrap_or_else(|e| e.into_inner()) = backend;
        Ok(())
    }

    /// Publish a collection replacement.
    ///
    /// The update reaches sibling contexts immediately. With a backend
    /// configured, the send is scheduled after the debounce window and the
    /// returned future resolves once the backend answered. Updates of the
    /// same kind collapsed into one send all resolve with that send's result.
    pub fn broadcast_update(&self, update: SyncUpdate) -> SyncFuture {
        if self.shutdown.is_cancelled() {
            return Box::pin(async { Err(NavError::Closed) });
        }

        self.inner.channel.publish(SyncEnvelope {
            origin: self.inner.context_id.clone(),
            update: update.clone(),
        });

        match self.inner.backend() {
            Some(backend) => self.schedule(backend, update),
            None => Box::pin(async { Ok(()) }),
        }
    }

    /// Publish to sibling contexts only, never to the backend
    pub fn publish_local(&self, update: SyncUpdate) {
        if self.shutdown.is_cancelled() {
            return;
        }

        debug!("Publishing {} ({} items) to sibling contexts", update.kind(), update.len());
        self.inner.channel.publish(SyncEnvelope {
            origin: self.inner.context_id.clone(),
            update,
        });
    }

    fn schedule(&self, backend: BackendClient, update: SyncUpdate) -> SyncFuture {
        let kind = update.kind();
        let timer = self.shutdown.child_token();
        let (tx, rx) = oneshot::channel();

        let sequence = {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            let sequence = self.inner.sequences[kind.index()].fetch_add(1, Ordering::SeqCst) + 1;
            let slot = &mut pending[kind.index()];
            if let Some(previous) = slot.timer.replace(timer.clone()) {
                previous.cancel();
                debug!("Superseding pending {} sync with #{}", kind, sequence);
            }
            slot.waiters.push(tx);
            sequence
        };

        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            tokio::select! {
                // The newer send owns the waiters now
                _ = timer.cancelled() => return,
                _ = sleep(inner.debounce) => {}
            }

            {
                let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
                if inner.latest_sequence(kind) != sequence {
                    return;
                }
                pending[kind.index()].timer = None;
            }

            let result = backend.push(&update).await;

            // Only the latest issued send settles the waiters
            let waiters = {
                let mut pending = inner.pending.lock().unwrap_or_else(|e| e.into_inner());
                if inner.latest_sequence(kind) != sequence {
                    debug!("Discarding stale {} sync response #{}", kind, sequence);
                    return;
                }
                std::mem::take(&mut pending[kind.index()].waiters)
            };

            if let Err(e) = &result {
                error!("Failed to sync {} to backend: {}", kind, e);
            }
            debug!("Settling {} {} sync callers with #{}", waiters.len(), kind, sequence);
            for waiter in waiters {
                let _ = waiter.send(shared_result(&result));
            }
        });

        Box::pin(async move { rx.await.unwrap_or(Err(NavError::Closed)) })
    }

    /// Load both collections from the backend, `None` when unavailable
    pub async fn load_from_backend(&self) -> Option<BackendSnapshot> {
        match self.try_load_from_backend().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!("Failed to load data from backend: {}", e);
                None
            }
        }
    }

    /// Like [`Self::load_from_backend`] but keeps the reason of a failure
    pub async fn try_load_from_backend(&self) -> Result<BackendSnapshot> {
        let backend = self
            .inner
            .backend()
            .ok_or_else(|| NavError::Config("backend URL is not configured".to_string()))?;

        let snapshot = backend.fetch_snapshot().await?;
        info!(
            "Loaded {} services and {} categories from backend",
            snapshot.services.len(),
            snapshot.categories.len()
        );
        Ok(snapshot)
    }

    /// Whether the configured backend answers its liveness endpoint
    pub async fn backend_health(&self) -> bool {
        match self.inner.backend() {
            Some(backend) => backend.health().await,
            None => false,
        }
    }

    /// Stop listeners and cancel pending sends. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        // Dropping the waiters resolves their callers with `Closed`
        let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Default::default();
        drop(pending);

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }

        self.inner.observers.clear();
        info!("Sync broadcaster for context {} shut down", self.inner.context_id);
    }
}

/// Copy of a send result for every caller it settles
fn shared_result(result: &Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(NavError::Backend(msg)) => Err(NavError::Backend(msg.clone())),
        Err(other) => Err(NavError::Backend(other.to_string())),
    }
}

impl Drop for SyncBroadcaster {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Service};
    use serde_json::json;
    use tokio::time::timeout;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(backend_url: Option<String>) -> Config {
        Config {
            backend_url,
            sync_debounce: Duration::from_millis(50),
            http_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    fn service(id: &str) -> Service {
        Service::new(
            id.to_string(),
            id.to_uppercase(),
            format!("http://{}.internal", id),
            "1".to_string(),
        )
    }

    fn recorder(sync: &SyncBroadcaster) -> (Arc<Mutex<Vec<SyncUpdate>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = sync.subscribe_fn(move |update| sink.lock().unwrap().push(update.clone()));
        (seen, sub)
    }

    async fn wait_for(seen: &Arc<Mutex<Vec<SyncUpdate>>>, count: usize) {
        timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for sync updates");
    }

    #[tokio::test]
    async fn test_update_reaches_sibling_but_not_sender() {
        let channel = SyncChannel::new(16);
        let store = LocalStore::in_memory();
        let first = SyncBroadcaster::new(store.clone(), channel.clone(), &test_config(None)).unwrap();
        let second = SyncBroadcaster::new(store.attach(), channel, &test_config(None)).unwrap();

        let (own, _own_sub) = recorder(&first);
        let (sibling, _sibling_sub) = recorder(&second);

        let update = SyncUpdate::Services(vec![service("a")]);
        first.broadcast_update(update.clone()).await.unwrap();

        wait_for(&sibling, 1).await;
        assert_eq!(sibling.lock().unwrap()[0], update);
        sleep(Duration::from_millis(20)).await;
        assert!(own.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_change_is_relayed() {
        let channel = SyncChannel::new(16);
        let store = LocalStore::in_memory();
        let sync = SyncBroadcaster::new(store.clone(), channel, &test_config(None)).unwrap();
        let (seen, _sub) = recorder(&sync);

        let other_context = store.attach();
        let categories = vec![Category::new("9".to_string(), "Other".to_string())];
        other_context.set(crate::store::CATEGORIES_KEY, &categories).unwrap();
        other_context.set("unrelated", &1).unwrap();

        wait_for(&seen, 1).await;
        assert_eq!(seen.lock().unwrap()[0], SyncUpdate::Categories(categories));
    }

    #[tokio::test]
    async fn test_debounce_collapses_to_latest() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services"))
            .and(body_json(json!([
                {"id": "b", "name": "B", "url": "http://b.internal", "category": "1", "status": "online", "tags": []}
            ])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let first = sync.broadcast_update(SyncUpdate::Services(vec![service("a")]));
        let second = sync.broadcast_update(SyncUpdate::Services(vec![service("b")]));
        let (first, second) = tokio::join!(first, second);

        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_kinds_debounce_independently() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let services = sync.broadcast_update(SyncUpdate::Services(vec![]));
        let categories = sync.broadcast_update(SyncUpdate::Categories(vec![]));
        let (services, categories) = tokio::join!(services, categories);

        assert!(services.is_ok());
        assert!(categories.is_ok());
    }

    #[tokio::test]
    async fn test_backend_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/categories"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let result = sync.broadcast_update(SyncUpdate::Categories(vec![])).await;
        assert!(matches!(result, Err(NavError::Backend(ref msg)) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_collapsed_sends_share_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let first = sync.broadcast_update(SyncUpdate::Services(vec![service("a")]));
        let second = sync.broadcast_update(SyncUpdate::Services(vec![service("a"), service("b")]));
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first, Err(NavError::Backend(ref msg)) if msg.contains("500")));
        assert!(matches!(second, Err(NavError::Backend(ref msg)) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services"))
            .and(body_json(json!([
                {"id": "a", "name": "A", "url": "http://a.internal", "category": "1", "status": "online", "tags": []}
            ])))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/services"))
            .and(body_json(json!([
                {"id": "b", "name": "B", "url": "http://b.internal", "category": "1", "status": "online", "tags": []}
            ])))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let slow = sync.broadcast_update(SyncUpdate::Services(vec![service("a")]));
        // Let the first send leave its debounce window
        sleep(Duration::from_millis(100)).await;
        let fresh = sync.broadcast_update(SyncUpdate::Services(vec![service("b")]));

        // The late 200 for the first send must not settle anyone
        let (slow, fresh) = tokio::join!(slow, fresh);
        assert!(matches!(slow, Err(NavError::Backend(_))));
        assert!(matches!(fresh, Err(NavError::Backend(_))));
    }

    #[tokio::test]
    async fn test_shutdown_closes_pending_send() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(16),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let pending = sync.broadcast_update(SyncUpdate::Services(vec![service("a")]));
        sync.shutdown();

        assert!(matches!(pending.await, Err(NavError::Closed)));
    }

    #[tokio::test]
    async fn test_publish_local_skips_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let channel = SyncChannel::new(16);
        let store = LocalStore::in_memory();
        let first = SyncBroadcaster::new(store.clone(), channel.clone(), &test_config(Some(server.uri()))).unwrap();
        let second = SyncBroadcaster::new(store.attach(), channel, &test_config(None)).unwrap();
        let (sibling, _sub) = recorder(&second);

        let update = SyncUpdate::Services(vec![service("a")]);
        first.publish_local(update.clone());

        wait_for(&sibling, 1).await;
        assert_eq!(sibling.lock().unwrap()[0], update);
        sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn test_backend_url_is_persisted() {
        let store = LocalStore::in_memory();
        let sync = SyncBroadcaster::new(store.clone(), SyncChannel::new(4), &test_config(None)).unwrap();
        assert!(!sync.has_backend());

        sync.set_backend_url(Some("http://backend:8001/")).unwrap();
        assert_eq!(sync.backend_url().as_deref(), Some("http://backend:8001"));

        let reopened = SyncBroadcaster::new(store.attach(), SyncChannel::new(4), &test_config(None)).unwrap();
        assert_eq!(reopened.backend_url().as_deref(), Some("http://backend:8001"));

        sync.set_backend_url(None).unwrap();
        let cleared = SyncBroadcaster::new(
            store.attach(),
            SyncChannel::new(4),
            &test_config(Some("http://fallback:8001".to_string())),
        )
        .unwrap();
        assert_eq!(cleared.backend_url().as_deref(), Some("http://fallback:8001"));
    }

    #[tokio::test]
    async fn test_load_from_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/services"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/categories"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "1", "name": "Dev"}
            ])))
            .mount(&server)
            .await;

        let sync = SyncBroadcaster::new(
            LocalStore::in_memory(),
            SyncChannel::new(4),
            &test_config(Some(server.uri())),
        )
        .unwrap();

        let snapshot = sync.load_from_backend().await.unwrap();
        assert!(snapshot.services.is_empty());
        assert_eq!(snapshot.categories.len(), 1);
    }

    #[tokio::test]
    async fn test_load_without_backend_is_none() {
        let sync = SyncBroadcaster::new(LocalStore::in_memory(), SyncChannel::new(4), &test_config(None)).unwrap();

        assert!(sync.load_from_backend().await.is_none());
        assert!(matches!(
            sync.try_load_from_backend().await,
            Err(NavError::Config(_))
        ));
        assert!(!sync.backend_health().await);
    }

    #[tokio::test]
    async fn test_without_backend_resolves_immediately() {
        let sync = SyncBroadcaster::new(LocalStore::in_memory(), SyncChannel::new(4), &test_config(None)).unwrap();

        let mut sent = tokio_test::task::spawn(sync.broadcast_update(SyncUpdate::Services(vec![service("a")])));
        tokio_test::assert_ready_ok!(sent.poll());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_updates() {
        let sync = SyncBroadcaster::new(LocalStore::in_memory(), SyncChannel::new(4), &test_config(None)).unwrap();
        sync.shutdown();
        sync.shutdown();

        let result = sync.broadcast_update(SyncUpdate::Services(vec![])).await;
        assert!(matches!(result, Err(NavError::Closed)));
    }
}

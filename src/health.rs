//! Per-service health state machine with subscription and periodic re-checks

use crate::models::{HealthStatus, ServiceTarget};
use crate::observer::{Observer, ObserverRegistry, Subscription};
use crate::probe::{HealthProbe, parse_service_url};
use crate::store::{HEALTH_STATUS_KEY, LocalStore};

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct HealthInner {
    probe: Arc<dyn HealthProbe>,
    store: LocalStore,
    statuses: RwLock<HashMap<String, HealthStatus>>,
    observers: ObserverRegistry<HealthStatus>,
    interval: RwLock<Duration>,
    targets: RwLock<Vec<ServiceTarget>>,
    /// Latest check issued per service
    checks: Mutex<HashMap<String, u64>>,
}

impl HealthInner {
    async fn check_service(&self, service_id: &str, url: &str) -> HealthStatus {
        let check = {
            let mut checks = self.checks.lock().unwrap_or_else(|e| e.into_inner());
            let latest = checks.entry(service_id.to_string()).or_default();
            *latest += 1;
            *latest
        };
        self.update_status(HealthStatus::checking(service_id.to_string()), None);

        let status = match parse_service_url(url) {
            Ok(parsed) => match self.probe.probe(&parsed).await {
                Ok(outcome) => HealthStatus::reached(
                    service_id.to_string(),
                    outcome.reachable,
                    outcome.response_time.as_millis() as u64,
                ),
                Err(e) => HealthStatus::failed(service_id.to_string(), e.to_string()),
            },
            Err(e) => HealthStatus::failed(service_id.to_string(), e.to_string()),
        };

        if self.update_status(status.clone(), Some(check)) {
            debug!("Service {} is {}", service_id, status.status);
        } else {
            debug!("Discarding stale check #{} of service {}", check, service_id);
        }
        status
    }

    async fn check_all(&self, targets: &[ServiceTarget]) -> Vec<HealthStatus> {
        join_all(
            targets
                .iter()
                .map(|target| self.check_service(&target.id, &target.url)),
        )
        .await
    }

    /// Record and publish a status. A result of `check` is dropped when a
    /// newer check of the same service was issued meanwhile.
    fn update_status(&self, status: HealthStatus, check: Option<u64>) -> bool {
        {
            let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
            if let Some(check) = check {
                let checks = self.checks.lock().unwrap_or_else(|e| e.into_inner());
                if checks.get(&status.service_id).is_some_and(|latest| *latest > check) {
                    return false;
                }
            }
            statuses.insert(status.service_id.clone(), status.clone());
            self.persist(&statuses);
        }
        self.observers.notify(&status);
        true
    }

    fn persist(&self, statuses: &HashMap<String, HealthStatus>) {
        if let Err(e) = self.store.set(HEALTH_STATUS_KEY, statuses) {
            warn!("Failed to save health status: {}", e);
        }
    }

    fn interval(&self) -> Duration {
        *self.interval.read().unwrap_or_else(|e| e.into_inner())
    }

    fn targets(&self) -> Vec<ServiceTarget> {
        self.targets.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

struct AutoCheck {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tracks the health of every service and notifies subscribers on each
/// transition (`checking`, then `online`, `offline` or `error`)
pub struct HealthMonitor {
    inner: Arc<HealthInner>,
    auto_check: Mutex<Option<AutoCheck>>,
}

impl HealthMonitor {
    /// Create a monitor, reloading the statuses persisted in `store`
    pub fn new(probe: Arc<dyn HealthProbe>, store: LocalStore, interval: Duration) -> Self {
        let statuses: HashMap<String, HealthStatus> = store.get(HEALTH_STATUS_KEY, HashMap::new());
        debug!("Loaded {} persisted health statuses", statuses.len());

        Self {
            inner: Arc::new(HealthInner {
                probe,
                store,
                statuses: RwLock::new(statuses),
                observers: ObserverRegistry::new(),
                interval: RwLock::new(interval),
                targets: RwLock::new(Vec::new()),
                checks: Mutex::new(HashMap::new()),
            }),
            auto_check: Mutex::new(None),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<HealthStatus>>) -> Subscription {
        self.inner.observers.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&HealthStatus) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe_fn(f)
    }

    /// Check one service. Never fails: problems surface as an `error` status.
    pub async fn check_service(&self, service_id: &str, url: &str) -> HealthStatus {
        self.inner.check_service(service_id, url).await
    }

    /// Check every target concurrently
    pub async fn check_all_services(&self, targets: &[ServiceTarget]) -> Vec<HealthStatus> {
        self.inner.check_all(targets).await
    }

    /// Check now, then again every interval until stopped. Replaces any
    /// running loop.
    pub fn start_auto_check(&self, targets: Vec<ServiceTarget>) {
        let mut auto_check = self.auto_check.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = auto_check.take() {
            previous.token.cancel();
            previous.handle.abort();
        }

        info!(
            "Starting auto health check for {} services every {:?}",
            targets.len(),
            self.inner.interval()
        );
        *self.inner.targets.write().unwrap_or_else(|e| e.into_inner()) = targets;

        let token = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let targets = inner.targets();
                inner.check_all(&targets).await;

                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = sleep(inner.interval()) => {}
                }
            }
        });

        *auto_check = Some(AutoCheck { token, handle });
    }

    /// Replace the services checked by the next passes without restarting
    pub fn update_targets(&self, targets: Vec<ServiceTarget>) {
        debug!("Auto health check now covers {} services", targets.len());
        *self.inner.targets.write().unwrap_or_else(|e| e.into_inner()) = targets;
    }

    pub fn stop_auto_check(&self) {
        let mut auto_check = self.auto_check.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = auto_check.take() {
            running.token.cancel();
            running.handle.abort();
            info!("Stopped auto health check");
        }
    }

    pub fn is_auto_checking(&self) -> bool {
        self.auto_check
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn check_interval(&self) -> Duration {
        self.inner.interval()
    }

    /// Change the interval; a running loop restarts with the same targets
    pub fn set_check_interval(&self, interval: Duration) {
        *self.inner.interval.write().unwrap_or_else(|e| e.into_inner()) = interval;

        if self.is_auto_checking() {
            self.start_auto_check(self.inner.targets());
        }
    }

    pub fn status(&self, service_id: &str) -> Option<HealthStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(service_id)
            .cloned()
    }

    pub fn all_statuses(&self) -> HashMap<String, HealthStatus> {
        self.inner
            .statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_status(&self, service_id: &str) {
        let mut statuses = self.inner.statuses.write().unwrap_or_else(|e| e.into_inner());
        if statuses.remove(service_id).is_some() {
            self.inner.persist(&statuses);
        }
    }

    pub fn clear_all_statuses(&self) {
        let mut statuses = self.inner.statuses.write().unwrap_or_else(|e| e.into_inner());
        statuses.clear();
        self.inner.persist(&statuses);
    }

    /// Stop background checks and detach subscribers
    pub fn shutdown(&self) {
        self.stop_auto_check();
        self.inner.observers.clear();
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop_auto_check();
    }
}

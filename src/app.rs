//! Wires the store, sync broadcaster, catalog and health monitor of one
//! context together

use crate::catalog::ServiceCatalog;
use crate::config::Config;
use crate::errors::{NavError, Result};
use crate::health::HealthMonitor;
use crate::models::{CollectionKind, ServiceTarget};
use crate::observer::Subscription;
use crate::probe::probe_from_config;
use crate::store::LocalStore;
use crate::sync::{SyncBroadcaster, SyncChannel};

use std::sync::{Arc, Mutex, Weak};
use tracing::info;

/// One dashboard context: every component it needs, no globals
pub struct Dashboard {
    config: Config,
    store: LocalStore,
    sync: Arc<SyncBroadcaster>,
    catalog: Arc<ServiceCatalog>,
    health: Arc<HealthMonitor>,
    target_refresh: Mutex<Option<Subscription>>,
}

impl Dashboard {
    /// Open the file-backed store from `config` and start every component
    pub fn start(config: Config, channel: SyncChannel) -> Result<Self> {
        config.validate().map_err(NavError::Config)?;
        let store = LocalStore::open(&config.storage_dir)?;
        Self::with_store(config, store, channel)
    }

    /// Start on an existing store, e.g. [`LocalStore::attach`] for a sibling
    /// context
    pub fn with_store(config: Config, store: LocalStore, channel: SyncChannel) -> Result<Self> {
        let sync = Arc::new(SyncBroadcaster::new(store.clone(), channel, &config)?);
        let catalog = Arc::new(ServiceCatalog::open(store.clone(), Arc::clone(&sync)));
        let health = Arc::new(HealthMonitor::new(
            probe_from_config(&config)?,
            store.clone(),
            config.health_check_interval,
        ));

        info!("Dashboard context {} started", store.context_id());

        Ok(Self {
            config,
            store,
            sync,
            catalog,
            health,
            target_refresh: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncBroadcaster {
        &self.sync
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Auto-check every catalog service, following later catalog changes
    pub fn start_health_monitoring(&self) {
        self.health.start_auto_check(targets_of(&self.catalog));

        let health: Weak<HealthMonitor> = Arc::downgrade(&self.health);
        let catalog: Weak<ServiceCatalog> = Arc::downgrade(&self.catalog);
        let subscription = self.catalog.subscribe_fn(move |change| {
            if change.kind != CollectionKind::Services {
                return;
            }
            if let (Some(health), Some(catalog)) = (health.upgrade(), catalog.upgrade()) {
                health.update_targets(targets_of(&catalog));
            }
        });

        *self
            .target_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(subscription);
    }

    pub fn stop_health_monitoring(&self) {
        self.target_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.health.stop_auto_check();
    }

    /// Stop background work of every component
    pub fn shutdown(&self) {
        self.stop_health_monitoring();
        self.health.shutdown();
        self.sync.shutdown();
        info!("Dashboard context {} stopped", self.store.context_id());
    }
}

fn targets_of(catalog: &ServiceCatalog) -> Vec<ServiceTarget> {
    catalog
        .services()
        .iter()
        .map(ServiceTarget::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbeMode;
    use crate::models::{HealthState, NewService};
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    fn config(dir: &std::path::Path) -> Config {
        Config {
            storage_dir: dir.to_path_buf(),
            sync_debounce: Duration::from_millis(20),
            health_check_interval: Duration::from_millis(30),
            probe_mode: ProbeMode::Simulated,
            ..Config::default()
        }
    }

    fn grafana() -> NewService {
        NewService {
            name: "Grafana".to_string(),
            url: "http://grafana.internal:3000".to_string(),
            category: "4".to_string(),
            ..NewService::default()
        }
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            sync_channel_capacity: 0,
            ..config(dir.path())
        };
        assert!(matches!(
            Dashboard::start(config, SyncChannel::new(8)),
            Err(NavError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_catalog_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let dashboard = Dashboard::start(config(dir.path()), SyncChannel::new(8)).unwrap();
        let service = dashboard.catalog().add_service(grafana()).await.unwrap();
        dashboard.shutdown();
        drop(dashboard);

        let reopened = Dashboard::start(config(dir.path()), SyncChannel::new(8)).unwrap();
        assert_eq!(reopened.catalog().service(&service.id), Some(service));
        reopened.shutdown();
    }

    #[tokio::test]
    async fn test_health_monitoring_follows_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let dashboard = Dashboard::start(config(dir.path()), SyncChannel::new(8)).unwrap();

        dashboard.start_health_monitoring();
        assert!(dashboard.health().is_auto_checking());

        let service = dashboard.catalog().add_service(grafana()).await.unwrap();
        timeout(Duration::from_secs(3), async {
            loop {
                let state = dashboard.health().status(&service.id).map(|s| s.status);
                if matches!(state, Some(HealthState::Online | HealthState::Offline)) {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        dashboard.shutdown();
        assert!(!dashboard.health().is_auto_checking());
    }

    #[tokio::test]
    async fn test_sibling_dashboards_share_catalog() {
        let store = LocalStore::in_memory();
        let channel = SyncChannel::new(8);
        let dir = tempfile::tempdir().unwrap();

        let first = Dashboard::with_store(config(dir.path()), store.clone(), channel.clone()).unwrap();
        let second = Dashboard::with_store(config(dir.path()), store.attach(), channel).unwrap();

        let service = first.catalog().add_service(grafana()).await.unwrap();
        timeout(Duration::from_secs(2), async {
            while second.catalog().service(&service.id).is_none() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        first.shutdown();
        second.shutdown();
    }
}

//! In-memory owner of the services and categories collections.
//!
//! Every mutation is staged on a working copy, broadcast through the
//! [`SyncBroadcaster`] and only committed (memory and local store) once the
//! send succeeded. A failed send restores the last committed state.

use crate::errors::{NavError, Result};
use crate::import_export::{MergeStrategy, export_config, merge_data};
use crate::models::{
    Category, CollectionKind, ExportData, NewService, Service, SyncUpdate, default_categories,
    recompute_counts,
};
use crate::observer::{Observer, ObserverRegistry, Subscription};
use crate::store::{CATEGORIES_KEY, LocalStore, SERVICES_KEY};
use crate::sync::{SyncBroadcaster, SyncFuture};

use chrono::Utc;
use futures::future::join_all;
use std::sync::{Arc, RwLock, RwLockWriteGuard, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a collection change came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A mutation made through this catalog
    Local,
    /// Another context replaced the collection
    Remote,
    /// A failed send restored the committed state
    Rollback,
    /// State loaded from the backend at startup
    Bootstrap,
}

/// Emitted whenever the visible content of a collection changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CatalogChange {
    pub kind: CollectionKind,
    pub origin: ChangeOrigin,
}

#[derive(Clone, Debug, Default)]
struct Collections {
    services: Vec<Service>,
    categories: Vec<Category>,
}

impl Collections {
    fn replace(&mut self, update: &SyncUpdate) {
        match update {
            SyncUpdate::Services(services) => self.services = services.clone(),
            SyncUpdate::Categories(categories) => self.categories = categories.clone(),
        }
        recompute_counts(&mut self.categories, &self.services);
    }

    fn snapshot(&self, kind: CollectionKind) -> SyncUpdate {
        match kind {
            CollectionKind::Services => SyncUpdate::Services(self.services.clone()),
            CollectionKind::Categories => SyncUpdate::Categories(self.categories.clone()),
        }
    }
}

struct CatalogState {
    /// Confirmed by the last successful send, mirrors the local store
    committed: Collections,
    /// Committed state plus every mutation still in flight
    working: Collections,
    /// Bumped each time a kind is staged or replaced
    generations: [u64; 2],
    /// Generation of the state held in `committed`
    committed_generations: [u64; 2],
}

/// A staged collection waiting for its send to settle
struct Staged {
    kind: CollectionKind,
    generation: u64,
    update: SyncUpdate,
}

struct CatalogInner {
    store: LocalStore,
    state: RwLock<CatalogState>,
    observers: ObserverRegistry<CatalogChange>,
}

impl CatalogInner {
    fn write(&self) -> RwLockWriteGuard<'_, CatalogState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> T {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        f(&state.working)
    }

    fn notify(&self, kinds: &[CollectionKind], origin: ChangeOrigin) {
        for &kind in kinds {
            self.observers.notify(&CatalogChange { kind, origin });
        }
    }

    fn persist(&self, update: &SyncUpdate) {
        let result = match update {
            SyncUpdate::Services(services) => self.store.set(SERVICES_KEY, services),
            SyncUpdate::Categories(categories) => self.store.set(CATEGORIES_KEY, categories),
        };
        if let Err(e) = result {
            error!("Failed to save {} locally: {}", update.kind(), e);
        }
    }

    /// Replace a collection with state owned elsewhere, no send and no write
    fn apply_remote(&self, update: &SyncUpdate) {
        let kind = update.kind();
        {
            let mut state = self.write();
            state.generations[kind.index()] += 1;
            state.committed_generations[kind.index()] = state.generations[kind.index()];
            state.committed.replace(update);
            state.working.replace(update);
        }
        debug!("Replaced {} with {} remote items", kind, update.len());
        self.notify(&[kind], ChangeOrigin::Remote);
    }

    fn commit(&self, staged: &Staged) {
        let mut state = self.write();
        let index = staged.kind.index();
        if state.committed_generations[index] >= staged.generation {
            return;
        }

        state.committed_generations[index] = staged.generation;
        state.committed.replace(&staged.update);
        self.persist(&staged.update);
        debug!("Committed {} generation {}", staged.kind, staged.generation);
    }

    /// Restore the committed state of a kind, returning it when restored
    fn rollback(&self, staged: &Staged) -> Option<SyncUpdate> {
        let mut state = self.write();
        if state.generations[staged.kind.index()] != staged.generation {
            // A newer staged state owns the working copy now
            return None;
        }

        let restored = state.committed.snapshot(staged.kind);
        state.working.replace(&restored);
        warn!("Rolled back {} to the last committed state", staged.kind);
        Some(restored)
    }
}

/// The services and categories of one context
pub struct ServiceCatalog {
    inner: Arc<CatalogInner>,
    sync: Arc<SyncBroadcaster>,
    _remote: Subscription,
}

impl ServiceCatalog {
    /// Load both collections from the local store and follow remote updates
    pub fn open(store: LocalStore, sync: Arc<SyncBroadcaster>) -> Self {
        let mut collections = Collections {
            services: store.get(SERVICES_KEY, Vec::new()),
            categories: store.get(CATEGORIES_KEY, default_categories()),
        };
        recompute_counts(&mut collections.categories, &collections.services);

        info!(
            "Catalog opened with {} services in {} categories",
            collections.services.len(),
            collections.categories.len()
        );

        let inner = Arc::new(CatalogInner {
            store,
            state: RwLock::new(CatalogState {
                committed: collections.clone(),
                working: collections,
                generations: [0, 0],
                committed_generations: [0, 0],
            }),
            observers: ObserverRegistry::new(),
        });

        let weak: Weak<CatalogInner> = Arc::downgrade(&inner);
        let remote = sync.subscribe_fn(move |update| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_remote(update);
            }
        });

        Self {
            inner,
            sync,
            _remote: remote,
        }
    }

    /// Replace local state with the backend's when one is configured.
    ///
    /// Returns whether backend data was loaded. An unreachable backend leaves
    /// the catalog empty in memory; the persisted cache is not touched.
    pub async fn bootstrap(&self) -> bool {
        if !self.sync.has_backend() {
            debug!("No backend configured, keeping local catalog");
            return false;
        }

        let (mut collections, loaded) = match self.sync.try_load_from_backend().await {
            Ok(snapshot) => (
                Collections {
                    services: snapshot.services,
                    categories: snapshot.categories,
                },
                true,
            ),
            Err(e) => {
                warn!("Backend data unavailable, starting empty: {}", e);
                (Collections::default(), false)
            }
        };

        recompute_counts(&mut collections.categories, &collections.services);

        {
            let mut state = self.inner.write();
            for generation in state.generations.iter_mut() {
                *generation += 1;
            }
            state.committed_generations = state.generations;
            state.working = collections.clone();
            state.committed = collections;

            if loaded {
                for kind in CollectionKind::ALL {
                    self.inner.persist(&state.committed.snapshot(kind));
                }
            }
        }

        self.inner
            .notify(&CollectionKind::ALL, ChangeOrigin::Bootstrap);
        loaded
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer<CatalogChange>>) -> Subscription {
        self.inner.observers.subscribe(observer)
    }

    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&CatalogChange) + Send + Sync + 'static,
    {
        self.inner.observers.subscribe_fn(f)
    }

    pub fn services(&self) -> Vec<Service> {
        self.inner.read(|c| c.services.clone())
    }

    pub fn categories(&self) -> Vec<Category> {
        self.inner.read(|c| c.categories.clone())
    }

    pub fn service(&self, id: &str) -> Option<Service> {
        self.inner
            .read(|c| c.services.iter().find(|s| s.id == id).cloned())
    }

    /// Services matching `query` (case-insensitive), optionally limited to
    /// one category
    pub fn filter_services(&self, query: &str, category: Option<&str>) -> Vec<Service> {
        let query = query.trim().to_lowercase();
        self.inner.read(|c| {
            c.services
                .iter()
                .filter(|s| category.is_none_or(|id| s.category == id))
                .filter(|s| query.is_empty() || s.matches(&query))
                .cloned()
                .collect()
        })
    }

    /// Serialize the current catalog as an export document
    pub fn export(&self) -> Result<String> {
        self.inner
            .read(|c| export_config(&c.services, &c.categories))
    }

    pub async fn add_service(&self, new: NewService) -> Result<Service> {
        self.mutate(&[CollectionKind::Services], |c| {
            require_category(&c.categories, &new.category)?;
            let service = new.into_service(Uuid::new_v4().to_string());
            c.services.push(service.clone());
            Ok(service)
        })
        .await
    }

    pub async fn update_service(&self, mut service: Service) -> Result<Service> {
        self.mutate(&[CollectionKind::Services], |c| {
            require_category(&c.categories, &service.category)?;
            let slot = c
                .services
                .iter_mut()
                .find(|s| s.id == service.id)
                .ok_or_else(|| NavError::ServiceNotFound(service.id.clone()))?;
            service.last_updated = Some(Utc::now());
            *slot = service.clone();
            Ok(service)
        })
        .await
    }

    pub async fn delete_service(&self, id: &str) -> Result<()> {
        self.mutate(&[CollectionKind::Services], |c| {
            let position = position_of(&c.services, id)?;
            c.services.remove(position);
            Ok(())
        })
        .await
    }

    /// Move a service to `to_index`, clamped to the end of the list
    pub async fn move_service(&self, id: &str, to_index: usize) -> Result<()> {
        self.mutate(&[CollectionKind::Services], |c| {
            let position = position_of(&c.services, id)?;
            let service = c.services.remove(position);
            let to_index = to_index.min(c.services.len());
            c.services.insert(to_index, service);
            Ok(())
        })
        .await
    }

    /// Delete every listed service, returning how many existed
    pub async fn batch_delete(&self, ids: &[String]) -> Result<usize> {
        let present = self.inner.read(|c| {
            c.services
                .iter()
                .filter(|s| ids.contains(&s.id))
                .count()
        });
        if present == 0 {
            return Ok(0);
        }

        self.mutate(&[CollectionKind::Services], |c| {
            let before = c.services.len();
            c.services.retain(|s| !ids.contains(&s.id));
            Ok(before - c.services.len())
        })
        .await
    }

    /// Move every listed service into `category`, returning how many moved
    pub async fn batch_move(&self, ids: &[String], category: &str) -> Result<usize> {
        self.mutate(&[CollectionKind::Services], |c| {
            require_category(&c.categories, category)?;
            let now = Utc::now();
            let mut moved = 0;
            for service in c.services.iter_mut().filter(|s| ids.contains(&s.id)) {
                service.category = category.to_string();
                service.last_updated = Some(now);
                moved += 1;
            }
            Ok(moved)
        })
        .await
    }

    pub async fn add_category(
        &self,
        name: &str,
        icon: Option<String>,
        color: Option<String>,
    ) -> Result<Category> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NavError::InvalidOperation(
                "category name cannot be empty".to_string(),
            ));
        }

        self.mutate(&[CollectionKind::Categories], |c| {
            let category = Category {
                id: Uuid::new_v4().to_string(),
                name: name.to_string(),
                icon,
                color,
                count: 0,
            };
            c.categories.push(category.clone());
            Ok(category)
        })
        .await
    }

    pub async fn update_category(&self, category: Category) -> Result<Category> {
        let id = category.id.clone();
        self.mutate(&[CollectionKind::Categories], |c| {
            let slot = c
                .categories
                .iter_mut()
                .find(|existing| existing.id == id)
                .ok_or_else(|| NavError::CategoryNotFound(id.clone()))?;
            *slot = category;
            Ok(())
        })
        .await?;

        self.inner
            .read(|c| c.categories.iter().find(|existing| existing.id == id).cloned())
            .ok_or(NavError::CategoryNotFound(id))
    }

    /// Delete a category, moving its services to the first remaining one
    pub async fn delete_category(&self, id: &str) -> Result<()> {
        self.mutate(&CollectionKind::ALL, |c| {
            let position = c
                .categories
                .iter()
                .position(|category| category.id == id)
                .ok_or_else(|| NavError::CategoryNotFound(id.to_string()))?;
            c.categories.remove(position);

            let owned = c.services.iter().filter(|s| s.category == id).count();
            if owned > 0 {
                let fallback = c.categories.first().map(|f| f.id.clone()).ok_or_else(|| {
                    NavError::InvalidOperation(format!(
                        "cannot delete the last category while {} services use it",
                        owned
                    ))
                })?;
                for service in c.services.iter_mut().filter(|s| s.category == id) {
                    service.category = fallback.clone();
                }
                debug!("Reassigned {} services to category {}", owned, fallback);
            }
            Ok(())
        })
        .await
    }

    /// Merge an imported document into the catalog and sync both collections
    pub async fn apply_import(&self, data: &ExportData, strategy: MergeStrategy) -> Result<()> {
        self.mutate(&CollectionKind::ALL, |c| {
            let merged = merge_data(
                &c.services,
                &c.categories,
                &data.services,
                &data.categories,
                strategy,
            );
            c.services = merged.services;
            c.categories = merged.categories;
            Ok(())
        })
        .await?;

        info!(
            "Imported {} services and {} categories ({})",
            data.services.len(),
            data.categories.len(),
            strategy
        );
        Ok(())
    }

    /// Stage a mutation of `kinds`, send them and settle the outcome
    async fn mutate<T>(
        &self,
        kinds: &[CollectionKind],
        mutate: impl FnOnce(&mut Collections) -> Result<T>,
    ) -> Result<T> {
        let (value, staged, sends) = {
            let mut state = self.inner.write();
            let mut draft = state.working.clone();
            let value = mutate(&mut draft)?;
            recompute_counts(&mut draft.categories, &draft.services);
            state.working = draft;

            let mut staged = Vec::with_capacity(kinds.len());
            let mut sends: Vec<SyncFuture> = Vec::with_capacity(kinds.len());
            for &kind in kinds {
                state.generations[kind.index()] += 1;
                let update = state.working.snapshot(kind);
                sends.push(self.sync.broadcast_update(update.clone()));
                staged.push(Staged {
                    kind,
                    generation: state.generations[kind.index()],
                    update,
                });
            }
            (value, staged, sends)
        };
        self.inner.notify(kinds, ChangeOrigin::Local);

        let results = join_all(sends).await;
        let mut confirmed = Vec::with_capacity(staged.len());
        let mut failure = None;
        for (staged, result) in staged.iter().zip(results) {
            match result {
                Ok(()) => confirmed.push(staged),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            None => {
                for staged in confirmed {
                    self.inner.commit(staged);
                }
                Ok(value)
            }
            Some(e) => {
                let mut restored = Vec::with_capacity(staged.len());
                for staged in &staged {
                    if let Some(update) = self.inner.rollback(staged) {
                        // Siblings already show the refused state
                        self.sync.publish_local(update);
                        restored.push(staged.kind);
                    }
                }
                self.inner.notify(&restored, ChangeOrigin::Rollback);
                Err(e)
            }
        }
    }
}

fn require_category(categories: &[Category], id: &str) -> Result<()> {
    if categories.iter().any(|c| c.id == id) {
        Ok(())
    } else {
        Err(NavError::CategoryNotFound(id.to_string()))
    }
}

fn position_of(services: &[Service], id: &str) -> Result<usize> {
    services
        .iter()
        .position(|s| s.id == id)
        .ok_or_else(|| NavError::ServiceNotFound(id.to_string()))
}

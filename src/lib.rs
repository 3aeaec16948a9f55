//! Service Navigation Core Library
//!
//! This library provides the data layer of a service-navigation dashboard:
//! a local key-value store, cross-context synchronization with an optional
//! backend, configuration import/export and simulated or real health checks.

pub mod app;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod health;
pub mod import_export;
pub mod models;
pub mod observer;
pub mod probe;
pub mod store;
pub mod sync;

pub use app::Dashboard;
pub use catalog::{CatalogChange, ChangeOrigin, ServiceCatalog};
pub use config::{Config, ProbeMode};
pub use errors::{ImportError, NavError, Result};
pub use health::HealthMonitor;
pub use import_export::MergeStrategy;
pub use models::{
    Category, CollectionKind, ExportData, HealthState, HealthStatus, NewService, Service,
    ServiceStatus, ServiceTarget, SyncUpdate,
};
pub use observer::{Observer, ObserverRegistry, Subscription};
pub use probe::{HealthProbe, HttpProbe, SimulatedProbe};
pub use store::LocalStore;
pub use sync::{SyncBroadcaster, SyncChannel};

//! Catalog data structures shared by storage, sync, import/export and health

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Display status of a service card
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Online,
    Offline,
    Maintenance,
    Checking,
    Error,
    Warning,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Online => write!(f, "online"),
            ServiceStatus::Offline => write!(f, "offline"),
            ServiceStatus::Maintenance => write!(f, "maintenance"),
            ServiceStatus::Checking => write!(f, "checking"),
            ServiceStatus::Error => write!(f, "error"),
            ServiceStatus::Warning => write!(f, "warning"),
        }
    }
}

impl ServiceStatus {
    /// Parse a wire value, `None` for anything outside the enum
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "online" => Some(ServiceStatus::Online),
            "offline" => Some(ServiceStatus::Offline),
            "maintenance" => Some(ServiceStatus::Maintenance),
            "checking" => Some(ServiceStatus::Checking),
            "error" => Some(ServiceStatus::Error),
            "warning" => Some(ServiceStatus::Warning),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Service {
    pub fn new(id: String, name: String, url: String, category: String) -> Self {
        Self {
            id,
            name,
            url,
            description: None,
            category,
            icon: None,
            status: ServiceStatus::Online,
            tags: Vec::new(),
            last_updated: None,
        }
    }

    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_icon(mut self, icon: String) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    /// Case-insensitive substring match over name, description, url and tags.
    /// `query` must already be lowercase.
    pub fn matches(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(query)
            || self
                .description
                .as_ref()
                .is_some_and(|d| d.to_lowercase().contains(query))
            || self.url.to_lowercase().contains(query)
            || self.tags.iter().any(|t| t.to_lowercase().contains(query))
    }
}

/// A service as entered by the user, before an id is assigned
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewService {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub status: ServiceStatus,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewService {
    pub(crate) fn into_service(self, id: String) -> Service {
        Service {
            id,
            name: self.name,
            url: self.url,
            description: self.description,
            category: self.category,
            icon: self.icon,
            status: self.status,
            tags: self.tags,
            last_updated: Some(Utc::now()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Derived from the services collection, see [`recompute_counts`]
    #[serde(default)]
    pub count: u32,
}

impl Category {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            icon: None,
            color: None,
            count: 0,
        }
    }

    pub fn with_icon(mut self, icon: String) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn with_color(mut self, color: String) -> Self {
        self.color = Some(color);
        self
    }
}

/// Recompute every category's `count` from the services referencing it
pub fn recompute_counts(categories: &mut [Category], services: &[Service]) {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for service in services {
        *counts.entry(service.category.as_str()).or_default() += 1;
    }

    for category in categories.iter_mut() {
        category.count = counts.get(category.id.as_str()).copied().unwrap_or(0);
    }
}

/// Categories a fresh catalog starts with
pub fn default_categories() -> Vec<Category> {
    [
        ("1", "Development", "code"),
        ("2", "Testing", "flask"),
        ("3", "Production", "server"),
        ("4", "Monitoring", "activity"),
        ("5", "Databases", "database"),
    ]
    .into_iter()
    .map(|(id, name, icon)| Category::new(id.to_string(), name.to_string()).with_icon(icon.to_string()))
    .collect()
}

/// Outcome of a health check
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Online,
    Offline,
    Checking,
    Error,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Online => write!(f, "online"),
            HealthState::Offline => write!(f, "offline"),
            HealthState::Checking => write!(f, "checking"),
            HealthState::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub service_id: String,
    pub status: HealthState,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn checking(service_id: String) -> Self {
        Self {
            service_id,
            status: HealthState::Checking,
            response_time: None,
            last_checked: Some(Utc::now()),
            error: None,
        }
    }

    pub fn reached(service_id: String, reachable: bool, response_time_ms: u64) -> Self {
        Self {
            service_id,
            status: if reachable {
                HealthState::Online
            } else {
                HealthState::Offline
            },
            response_time: Some(response_time_ms),
            last_checked: Some(Utc::now()),
            error: None,
        }
    }

    pub fn failed(service_id: String, error: String) -> Self {
        Self {
            service_id,
            status: HealthState::Error,
            response_time: None,
            last_checked: Some(Utc::now()),
            error: Some(error),
        }
    }
}

/// What the health monitor needs to know about a service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceTarget {
    pub id: String,
    pub url: String,
}

impl ServiceTarget {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

impl From<&Service> for ServiceTarget {
    fn from(service: &Service) -> Self {
        Self {
            id: service.id.clone(),
            url: service.url.clone(),
        }
    }
}

/// Import/export document
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    pub version: String,
    pub export_date: String,
    pub services: Vec<Service>,
    pub categories: Vec<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExportMetadata>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub total_services: usize,
    pub total_categories: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_by: Option<String>,
}

/// The two synchronized collections
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Services,
    Categories,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 2] = [CollectionKind::Services, CollectionKind::Categories];

    /// Backend endpoint holding the collection
    pub fn endpoint(&self) -> &'static str {
        match self {
            CollectionKind::Services => "/api/services",
            CollectionKind::Categories => "/api/categories",
        }
    }

    /// Local storage key holding the collection
    pub fn storage_key(&self) -> &'static str {
        match self {
            CollectionKind::Services => crate::store::SERVICES_KEY,
            CollectionKind::Categories => crate::store::CATEGORIES_KEY,
        }
    }

    pub fn from_storage_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.storage_key() == key)
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            CollectionKind::Services => 0,
            CollectionKind::Categories => 1,
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectionKind::Services => write!(f, "services"),
            CollectionKind::Categories => write!(f, "categories"),
        }
    }
}

/// A collection replacement relayed between contexts, `{type, data}` on the wire
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SyncUpdate {
    Services(Vec<Service>),
    Categories(Vec<Category>),
}

impl SyncUpdate {
    pub fn kind(&self) -> CollectionKind {
        match self {
            SyncUpdate::Services(_) => CollectionKind::Services,
            SyncUpdate::Categories(_) => CollectionKind::Categories,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SyncUpdate::Services(services) => services.len(),
            SyncUpdate::Categories(categories) => categories.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// JSON encoding of the bare collection, as sent to the backend
    pub fn collection_json(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SyncUpdate::Services(services) => serde_json::to_value(services),
            SyncUpdate::Categories(categories) => serde_json::to_value(categories),
        }
    }

    /// Decode a bare collection of the given kind
    pub fn from_collection_json(kind: CollectionKind, raw: &str) -> serde_json::Result<Self> {
        match kind {
            CollectionKind::Services => serde_json::from_str(raw).map(SyncUpdate::Services),
            CollectionKind::Categories => serde_json::from_str(raw).map(SyncUpdate::Categories),
        }
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn current_timestamp_millis() -> i64 {
    Utc::now().timestamp_millis()
}

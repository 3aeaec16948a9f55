//! Configuration import/export: validation, normalization and merge strategies

use crate::errors::{ImportError, NavError, Result};
use crate::models::{
    Category, ExportData, ExportMetadata, Service, ServiceStatus, current_timestamp_millis,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const EXPORT_VERSION: &str = "1.0.0";
pub const DEFAULT_EXPORT_PREFIX: &str = "service-nav-config";
pub const DEFAULT_SERVICE_ICON: &str = "globe";

const ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// How an imported document combines with the current catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Imported collections become the whole state
    #[default]
    Replace,
    /// Union by id, imported records win
    Merge,
    /// Imported records are added under fresh ids
    Append,
}

impl FromStr for MergeStrategy {
    type Err = NavError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(MergeStrategy::Replace),
            "merge" => Ok(MergeStrategy::Merge),
            "append" => Ok(MergeStrategy::Append),
            other => Err(NavError::Config(format!("unknown merge strategy: {}", other))),
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeStrategy::Replace => write!(f, "replace"),
            MergeStrategy::Merge => write!(f, "merge"),
            MergeStrategy::Append => write!(f, "append"),
        }
    }
}

/// Result of [`validate_import_data`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collections produced by [`merge_data`]
#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult {
    pub services: Vec<Service>,
    pub categories: Vec<Category>,
}

/// Serialize the catalog as a pretty-printed export document
pub fn export_config(services: &[Service], categories: &[Category]) -> Result<String> {
    let data = ExportData {
        version: EXPORT_VERSION.to_string(),
        export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        services: services.to_vec(),
        categories: categories.to_vec(),
        metadata: Some(ExportMetadata {
            total_services: services.len(),
            total_categories: categories.len(),
            exported_by: None,
        }),
    };

    Ok(serde_json::to_string_pretty(&data)?)
}

/// Write an export document to `{dir}/{prefix}-{YYYY-MM-DD}.json`
pub async fn download_config(
    dir: impl AsRef<Path>,
    services: &[Service],
    categories: &[Category],
    prefix: Option<&str>,
) -> Result<PathBuf> {
    let document = export_config(services, categories)?;
    let file_name = format!(
        "{}-{}.json",
        prefix.unwrap_or(DEFAULT_EXPORT_PREFIX),
        Utc::now().format("%Y-%m-%d")
    );
    let path = dir.as_ref().join(file_name);

    tokio::fs::create_dir_all(dir.as_ref()).await?;
    tokio::fs::write(&path, document).await?;

    info!(
        "Exported {} services and {} categories to {}",
        services.len(),
        categories.len(),
        path.display()
    );
    Ok(path)
}

/// Structural validation of an import document, collecting every violation
pub fn validate_import_data(data: &Value) -> ValidationReport {
    let mut errors = Vec::new();

    let Some(object) = data.as_object() else {
        errors.push("Invalid data format: expected JSON object".to_string());
        return ValidationReport { errors };
    };

    match object.get("version").and_then(required_text) {
        None => errors.push("Missing version field".to_string()),
        Some(version) if !is_version_compatible(&version) => errors.push(format!(
            "Incompatible version: {}. Current version: {}",
            version, EXPORT_VERSION
        )),
        Some(_) => {}
    }

    match object.get("services").and_then(Value::as_array) {
        None => errors.push("Invalid or missing services array".to_string()),
        Some(services) => {
            for (index, service) in services.iter().enumerate() {
                let missing = missing_fields(service, &["id", "name", "url", "category"]);
                if !missing.is_empty() {
                    errors.push(format!(
                        "Invalid service at index {}: missing required fields ({})",
                        index,
                        missing.join(", ")
                    ));
                }
            }
        }
    }

    match object.get("categories").and_then(Value::as_array) {
        None => errors.push("Invalid or missing categories array".to_string()),
        Some(categories) => {
            for (index, category) in categories.iter().enumerate() {
                let missing = missing_fields(category, &["id", "name"]);
                if !missing.is_empty() {
                    errors.push(format!(
                        "Invalid category at index {}: missing required fields ({})",
                        index,
                        missing.join(", ")
                    ));
                }
            }
        }
    }

    ValidationReport { errors }
}

/// Parse, validate and normalize an import document
pub fn import_config(json: &str) -> std::result::Result<ExportData, ImportError> {
    let data: Value =
        serde_json::from_str(json).map_err(|e| ImportError::Parse(e.to_string()))?;

    let report = validate_import_data(&data);
    if !report.is_valid() {
        warn!("Rejected import with {} validation errors", report.errors.len());
        return Err(ImportError::Validation(report.errors));
    }

    let services: Vec<Service> = data["services"]
        .as_array()
        .map(|list| list.iter().map(normalize_service).collect())
        .unwrap_or_default();
    let categories: Vec<Category> = data["categories"]
        .as_array()
        .map(|list| list.iter().map(normalize_category).collect())
        .unwrap_or_default();

    let metadata = data
        .get("metadata")
        .and_then(|m| serde_json::from_value::<ExportMetadata>(m.clone()).ok());

    debug!(
        "Imported {} services and {} categories",
        services.len(),
        categories.len()
    );

    Ok(ExportData {
        version: data["version"].as_str().unwrap_or(EXPORT_VERSION).to_string(),
        export_date: data["exportDate"].as_str().unwrap_or_default().to_string(),
        services,
        categories,
        metadata,
    })
}

/// Read a file and import its content
pub async fn import_from_file(path: impl AsRef<Path>) -> std::result::Result<ExportData, ImportError> {
    let content = tokio::fs::read_to_string(path.as_ref())
        .await
        .map_err(|e| ImportError::Read(format!("{}: {}", path.as_ref().display(), e)))?;
    import_config(&content)
}

/// Combine imported collections with the existing ones
pub fn merge_data(
    existing_services: &[Service],
    existing_categories: &[Category],
    imported_services: &[Service],
    imported_categories: &[Category],
    strategy: MergeStrategy,
) -> MergeResult {
    debug!(
        "Merging {} services / {} categories into {} / {} with strategy {}",
        imported_services.len(),
        imported_categories.len(),
        existing_services.len(),
        existing_categories.len(),
        strategy
    );

    match strategy {
        MergeStrategy::Replace => MergeResult {
            services: imported_services.to_vec(),
            categories: imported_categories.to_vec(),
        },
        MergeStrategy::Merge => MergeResult {
            services: union_by_id(existing_services, imported_services, |s| &s.id),
            categories: union_by_id(existing_categories, imported_categories, |c| &c.id),
        },
        MergeStrategy::Append => append(
            existing_services,
            existing_categories,
            imported_services,
            imported_categories,
        ),
    }
}

/// Demo document with three categories and three services
pub fn generate_sample_config() -> ExportData {
    let categories = vec![
        Category::new("cat-1".to_string(), "Development".to_string())
            .with_icon("code".to_string())
            .with_color("#3B82F6".to_string()),
        Category::new("cat-2".to_string(), "Production".to_string())
            .with_icon("server".to_string())
            .with_color("#10B981".to_string()),
        Category::new("cat-3".to_string(), "Monitoring".to_string())
            .with_icon("activity".to_string())
            .with_color("#F59E0B".to_string()),
    ];

    let tags = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();
    let services = vec![
        Service::new(
            "srv-1".to_string(),
            "API Gateway".to_string(),
            "http://192.168.1.100:8080".to_string(),
            "cat-1".to_string(),
        )
        .with_description("Main API gateway for microservices".to_string())
        .with_tags(tags(&["API", "Gateway", "Development"])),
        Service::new(
            "srv-2".to_string(),
            "Database Server".to_string(),
            "http://192.168.1.101:5432".to_string(),
            "cat-2".to_string(),
        )
        .with_description("PostgreSQL database server".to_string())
        .with_tags(tags(&["Database", "PostgreSQL", "Production"])),
        Service::new(
            "srv-3".to_string(),
            "Monitoring Dashboard".to_string(),
            "http://192.168.1.102:3000".to_string(),
            "cat-3".to_string(),
        )
        .with_description("Grafana monitoring dashboard".to_string())
        .with_tags(tags(&["Monitoring", "Grafana", "Dashboard"])),
    ];

    ExportData {
        version: EXPORT_VERSION.to_string(),
        export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        metadata: Some(ExportMetadata {
            total_services: services.len(),
            total_categories: categories.len(),
            exported_by: Some("Sample Generator".to_string()),
        }),
        services,
        categories,
    }
}

/// Only the major component gates compatibility
fn is_version_compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().unwrap_or_default().trim().to_string();
    major(version) == major(EXPORT_VERSION)
}

/// Non-empty string, or a number rendered as text
fn required_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn missing_fields(record: &Value, fields: &[&str]) -> Vec<String> {
    fields
        .iter()
        .filter(|field| record.get(**field).and_then(required_text).is_none())
        .map(|field| field.to_string())
        .collect()
}

fn optional_text(record: &Value, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn normalize_service(record: &Value) -> Service {
    let text = |field: &str| record.get(field).and_then(required_text).unwrap_or_default();

    let tags = record
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let status = record
        .get("status")
        .and_then(Value::as_str)
        .and_then(ServiceStatus::parse)
        .unwrap_or(ServiceStatus::Online);

    let last_updated = record
        .get("lastUpdated")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Service {
        id: text("id"),
        name: text("name"),
        url: text("url"),
        description: optional_text(record, "description"),
        category: text("category"),
        icon: optional_text(record, "icon").or_else(|| Some(DEFAULT_SERVICE_ICON.to_string())),
        status,
        tags,
        last_updated: Some(last_updated),
    }
}

fn normalize_category(record: &Value) -> Category {
    let count = record
        .get("count")
        .and_then(Value::as_u64)
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(0);

    Category {
        id: record.get("id").and_then(required_text).unwrap_or_default(),
        name: record.get("name").and_then(required_text).unwrap_or_default(),
        icon: optional_text(record, "icon"),
        color: optional_text(record, "color"),
        count,
    }
}

/// First-appearance order; later records with the same id overwrite in place
fn union_by_id<T: Clone>(existing: &[T], imported: &[T], id: impl Fn(&T) -> &String) -> Vec<T> {
    let mut merged: Vec<T> = Vec::with_capacity(existing.len() + imported.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in existing.iter().chain(imported.iter()) {
        match positions.get(id(record)) {
            Some(&index) => merged[index] = record.clone(),
            None => {
                positions.insert(id(record).clone(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    merged
}

fn append(
    existing_services: &[Service],
    existing_categories: &[Category],
    imported_services: &[Service],
    imported_categories: &[Category],
) -> MergeResult {
    let mut taken: HashSet<String> = existing_services
        .iter()
        .map(|s| s.id.clone())
        .chain(existing_categories.iter().map(|c| c.id.clone()))
        .collect();

    let mut category_ids: HashMap<String, String> = HashMap::new();
    let mut categories = existing_categories.to_vec();
    for category in imported_categories {
        let new_id = fresh_id(&mut taken);
        category_ids.insert(category.id.clone(), new_id.clone());
        categories.push(Category {
            id: new_id,
            ..category.clone()
        });
    }

    let known: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
    let fallback = categories.first().map(|c| c.id.clone());

    let mut services = existing_services.to_vec();
    for service in imported_services {
        let category = match category_ids.get(&service.category) {
            Some(remapped) => remapped.clone(),
            None if known.contains(service.category.as_str()) => service.category.clone(),
            None => fallback.clone().unwrap_or_else(|| service.category.clone()),
        };

        services.push(Service {
            id: fresh_id(&mut taken),
            category,
            ..service.clone()
        });
    }

    MergeResult {
        services,
        categories,
    }
}

/// `imported-{unix millis}-{9 base-36 chars}`, unique within `taken`
fn fresh_id(taken: &mut HashSet<String>) -> String {
    let mut rng = rand::rng();
    loop {
        let suffix: String = (0..9)
            .map(|_| ID_SUFFIX_ALPHABET[rng.random_range(0..ID_SUFFIX_ALPHABET.len())] as char)
            .collect();
        let id = format!("imported-{}-{}", current_timestamp_millis(), suffix);
        if taken.insert(id.clone()) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(id: &str, category: &str) -> Service {
        Service::new(
            id.to_string(),
            format!("Service {}", id),
            format!("http://{}.internal:8080", id),
            category.to_string(),
        )
    }

    fn category(id: &str) -> Category {
        Category::new(id.to_string(), format!("Category {}", id))
    }

    #[test]
    fn test_replace_returns_imported() {
        let result = merge_data(
            &[service("a", "1")],
            &[category("1")],
            &[service("x", "9")],
            &[category("9")],
            MergeStrategy::Replace,
        );

        assert_eq!(result.services, vec![service("x", "9")]);
        assert_eq!(result.categories, vec![category("9")]);
    }

    #[test]
    fn test_replace_with_empty_clears() {
        let result = merge_data(
            &[service("a", "1")],
            &[category("1")],
            &[],
            &[],
            MergeStrategy::Replace,
        );

        assert!(result.services.is_empty());
        assert!(result.categories.is_empty());
    }

    #[test]
    fn test_merge_imported_wins() {
        let mut updated = service("b", "1");
        updated.name = "Renamed".to_string();

        let result = merge_data(
            &[service("a", "1"), service("b", "1")],
            &[category("1")],
            &[updated.clone(), service("c", "2")],
            &[category("1"), category("2")],
            MergeStrategy::Merge,
        );

        let ids: Vec<&str> = result.services.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(result.services[1], updated);
        assert_eq!(result.categories.len(), 2);
    }

    #[test]
    fn test_append_generates_fresh_ids_and_remaps() {
        let existing_services = vec![service("a", "1")];
        let existing_categories = vec![category("1")];

        let result = merge_data(
            &existing_services,
            &existing_categories,
            &[service("a", "1"), service("b", "7"), service("c", "missing")],
            &[category("1"), category("7")],
            MergeStrategy::Append,
        );

        assert_eq!(result.services.len(), 4);
        assert_eq!(result.categories.len(), 3);

        let mut ids = HashSet::new();
        for svc in &result.services[1..] {
            assert!(svc.id.starts_with("imported-"));
            assert!(ids.insert(svc.id.clone()));
            assert_ne!(svc.id, "a");
        }

        let category_ids: HashSet<&str> = result.categories.iter().map(|c| c.id.as_str()).collect();
        for svc in &result.services {
            assert!(category_ids.contains(svc.category.as_str()));
        }

        // Imported "1" was remapped, so the appended copy of "a" follows it
        assert_eq!(result.services[1].category, result.categories[1].id);
        assert_eq!(result.services[2].category, result.categories[2].id);
    }

    #[test]
    fn test_version_gate() {
        let doc = |version: &str| {
            json!({"version": version, "exportDate": "", "services": [], "categories": []})
        };

        assert!(validate_import_data(&doc("1.9.9")).is_valid());
        let report = validate_import_data(&doc("2.0.0"));
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("Incompatible version: 2.0.0"));
    }

    #[test]
    fn test_validation_is_exhaustive() {
        let doc = json!({
            "version": "1.0.0",
            "services": [
                {"id": "a", "name": "A", "url": "http://a"},
                {"name": "B", "url": "http://b", "category": "1"}
            ],
            "categories": [{"id": "1"}]
        });

        let report = validate_import_data(&doc);
        assert_eq!(report.errors.len(), 3);
        assert!(report.errors[0].contains("index 0"));
        assert!(report.errors[1].contains("index 1"));
        assert!(report.errors[2].starts_with("Invalid category at index 0"));
    }

    #[test]
    fn test_validation_rejects_non_object() {
        let report = validate_import_data(&json!([1, 2, 3]));
        assert_eq!(report.errors, vec!["Invalid data format: expected JSON object".to_string()]);

        let report = validate_import_data(&json!({"services": {}, "categories": null}));
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn test_import_distinguishes_parse_and_validation() {
        assert!(matches!(import_config("{oops"), Err(ImportError::Parse(_))));
        assert!(matches!(
            import_config(r#"{"version": "3.0.0", "services": [], "categories": []}"#),
            Err(ImportError::Validation(_))
        ));
    }

    #[test]
    fn test_import_error_messages() {
        let parse = import_config("{oops").unwrap_err();
        assert_eq!(parse.messages().len(), 1);
        assert!(parse.messages()[0].starts_with("Failed to parse JSON"));

        let invalid = import_config(r#"{"version": "1.0.0", "services": [{"id": "s"}], "categories": [{}]}"#)
            .unwrap_err();
        let messages = invalid.messages();
        assert!(messages.len() >= 2);
        assert!(!messages.iter().any(|m| m.starts_with("Invalid import data")));
    }

    #[test]
    fn test_import_normalizes_records() {
        let doc = json!({
            "version": "1.2.0",
            "exportDate": "2024-01-01T00:00:00.000Z",
            "services": [{
                "id": 42, "name": "Wiki", "url": "http://wiki", "category": "1",
                "tags": "not-a-list", "status": "sleeping"
            }],
            "categories": [{"id": "1", "name": "Docs", "count": -3}]
        });

        let data = import_config(&doc.to_string()).unwrap();
        let svc = &data.services[0];
        assert_eq!(svc.id, "42");
        assert_eq!(svc.icon.as_deref(), Some(DEFAULT_SERVICE_ICON));
        assert!(svc.tags.is_empty());
        assert_eq!(svc.status, ServiceStatus::Online);
        assert!(svc.last_updated.is_some());
        assert_eq!(data.categories[0].count, 0);
        assert_eq!(data.version, "1.2.0");
    }

    #[test]
    fn test_export_import_round_trip() {
        let services = vec![
            service("a", "1")
                .with_icon("server".to_string())
                .with_tags(vec!["db".to_string()])
                .with_status(ServiceStatus::Maintenance),
            service("b", "2"),
        ];
        let categories = vec![category("1").with_color("#fff".to_string()), category("2")];

        let document = export_config(&services, &categories).unwrap();
        let data = import_config(&document).unwrap();

        assert_eq!(data.categories, categories);
        assert_eq!(data.services.len(), 2);
        for (imported, original) in data.services.iter().zip(&services) {
            assert_eq!(imported.id, original.id);
            assert_eq!(imported.name, original.name);
            assert_eq!(imported.url, original.url);
            assert_eq!(imported.category, original.category);
            assert_eq!(imported.tags, original.tags);
            assert_eq!(imported.status, original.status);
        }
        assert_eq!(data.services[0].icon.as_deref(), Some("server"));
        let metadata = data.metadata.unwrap();
        assert_eq!(metadata.total_services, 2);
        assert_eq!(metadata.total_categories, 2);
    }

    #[test]
    fn test_sample_config_is_importable() {
        let sample = generate_sample_config();
        let document = serde_json::to_string(&sample).unwrap();

        let data = import_config(&document).unwrap();
        assert_eq!(data.services.len(), 3);
        assert_eq!(
            data.metadata.and_then(|m| m.exported_by).as_deref(),
            Some("Sample Generator")
        );
    }

    #[test]
    fn test_merge_strategy_from_str() {
        assert_eq!("APPEND".parse::<MergeStrategy>().unwrap(), MergeStrategy::Append);
        assert!("mix".parse::<MergeStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_download_and_import_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = download_config(dir.path(), &[service("a", "1")], &[category("1")], None)
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("service-nav-config-"));
        assert!(name.ends_with(".json"));

        let data = import_from_file(&path).await.unwrap();
        assert_eq!(data.services[0].id, "a");

        let missing = import_from_file(dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(ImportError::Read(_))));
    }
}

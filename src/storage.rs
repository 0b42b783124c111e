//! Shared key-value storage for rules, settings and performance history
//!
//! Every key holds one JSON document that is read whole, modified in memory
//! and written back whole. Concurrent writers race with last-writer-wins
//! semantics; no locking is attempted across processes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{GmailError, Result};
use crate::models::{ActionSet, PerfEntry, Rule, Settings};

pub const RULES_KEY: &str = "rules";
pub const SETTINGS_KEY: &str = "settings";
pub const PERF_STATS_KEY: &str = "perfStats";

const IMPORTED_RULE_NAME: &str = "Imported Rule";

/// Raw JSON key-value store
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a key, `None` when it was never written
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the value stored under a key
    async fn set(&self, key: &str, value: Value) -> Result<()>;
}

/// One pretty-printed JSON file per key inside a directory
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let json = tokio::fs::read_to_string(&path).await.map_err(|e| {
            GmailError::StorageError(format!("Failed to read {:?}: {}", path, e))
        })?;
        let value = serde_json::from_str(&json)?;
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            GmailError::StorageError(format!("Failed to create {:?}: {}", self.dir, e))
        })?;

        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        let json = serde_json::to_string_pretty(&value)?;

        // Write then rename so readers never observe a half-written document
        tokio::fs::write(&tmp, json).await.map_err(|e| {
            GmailError::StorageError(format!("Failed to write {:?}: {}", tmp, e))
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            GmailError::StorageError(format!("Failed to replace {:?}: {}", path, e))
        })?;

        debug!("Saved {} to {:?}", key, path);
        Ok(())
    }
}

/// In-process storage, used by tests and embedders that persist elsewhere
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Outcome of importing a rules document
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Rules appended to the stored list
    pub imported: usize,
    /// Imported rules that will never match as written: (name, reason)
    pub invalid: Vec<(String, String)>,
}

/// Typed access to the persisted state layout
#[derive(Clone)]
pub struct Store {
    storage: Arc<dyn Storage>,
}

impl Store {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// File-backed store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(JsonFileStorage::new(dir)))
    }

    /// Store with no persistence beyond this process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(key).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.storage.set(key, serde_json::to_value(value)?).await
    }

    pub async fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.read(RULES_KEY).await?.unwrap_or_default())
    }

    pub async fn save_rules(&self, rules: &[Rule]) -> Result<()> {
        self.write(RULES_KEY, rules).await
    }

    pub async fn load_settings(&self) -> Result<Settings> {
        Ok(self.read(SETTINGS_KEY).await?.unwrap_or_default())
    }

    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.write(SETTINGS_KEY, settings).await
    }

    pub async fn load_perf_stats(&self) -> Result<Vec<PerfEntry>> {
        Ok(self.read(PERF_STATS_KEY).await?.unwrap_or_default())
    }

    pub async fn save_perf_stats(&self, entries: &[PerfEntry]) -> Result<()> {
        self.write(PERF_STATS_KEY, entries).await
    }

    /// Write defaults for every key that has never been written
    ///
    /// Returns the keys that were initialized.
    pub async fn initialize(&self) -> Result<Vec<&'static str>> {
        let mut initialized = Vec::new();

        if self.storage.get(RULES_KEY).await?.is_none() {
            self.save_rules(&[]).await?;
            initialized.push(RULES_KEY);
        }
        if self.storage.get(SETTINGS_KEY).await?.is_none() {
            self.save_settings(&Settings::default()).await?;
            initialized.push(SETTINGS_KEY);
        }
        if self.storage.get(PERF_STATS_KEY).await?.is_none() {
            self.save_perf_stats(&[]).await?;
            initialized.push(PERF_STATS_KEY);
        }

        if !initialized.is_empty() {
            info!("Initialized default state for {:?}", initialized);
        }
        Ok(initialized)
    }

    /// Append the rules of a JSON array document to the stored list
    ///
    /// Entries that are not objects are dropped. Every other entry is
    /// sanitized; rules that fail [`Rule::validate`] are still imported and
    /// reported so they can be fixed.
    pub async fn import_rules(&self, json: &str) -> Result<ImportReport> {
        let document: Value = serde_json::from_str(json)?;
        let entries = match document {
            Value::Array(entries) => entries,
            _ => {
                return Err(GmailError::InvalidInput(
                    "Rules document must be a JSON array".to_string(),
                ))
            }
        };

        let sanitized: Vec<Rule> = entries.iter().filter_map(sanitize_rule).collect();

        let mut report = ImportReport {
            imported: sanitized.len(),
            invalid: Vec::new(),
        };
        for rule in &sanitized {
            if let Err(e) = rule.validate() {
                report.invalid.push((rule.name.clone(), e.to_string()));
            }
        }

        let mut rules = self.load_rules().await?;
        rules.extend(sanitized);
        self.save_rules(&rules).await?;

        info!(
            "Imported {} rule(s), {} need attention",
            report.imported,
            report.invalid.len()
        );
        Ok(report)
    }

    /// Stored rules as a pretty JSON array
    pub async fn export_rules(&self) -> Result<String> {
        let rules = self.load_rules().await?;
        Ok(serde_json::to_string_pretty(&rules)?)
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn flag(value: Option<&Value>) -> bool {
    value.and_then(Value::as_bool).unwrap_or(false)
}

/// Normalize one imported entry; `None` for non-object entries
fn sanitize_rule(entry: &Value) -> Option<Rule> {
    let obj = entry.as_object()?;
    let actions = obj.get("actions");
    let action = |name: &str| actions.and_then(|a| a.get(name));

    Some(Rule {
        id: non_empty_str(obj.get("id")).unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: non_empty_str(obj.get("name")).unwrap_or_else(|| IMPORTED_RULE_NAME.to_string()),
        enabled: obj.get("enabled").and_then(Value::as_bool) != Some(false),
        from_pattern: non_empty_str(obj.get("fromPattern")),
        to_pattern: non_empty_str(obj.get("toPattern")),
        subject_pattern: non_empty_str(obj.get("subjectPattern")),
        body_pattern: non_empty_str(obj.get("bodyPattern")),
        actions: ActionSet {
            add_labels: string_list(action("addLabels")),
            remove_labels: string_list(action("removeLabels")),
            mark_as_read: flag(action("markAsRead")),
            mark_as_important: flag(action("markAsImportant")),
            star: flag(action("star")),
            archive: flag(action("archive")),
            trash: flag(action("trash")),
        },
        stats: None,
    })
}

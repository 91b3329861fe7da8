use crate::{OptionValue, UpdateChannel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Clock, Result, TesseraError};
use tracing::{debug, info};

/// Shared (cross-process) cache tier, e.g. memcached or redis.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<OptionValue>>;
    fn set(&self, key: &str, value: &OptionValue, ttl: Duration) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// Row of the durable options table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOption {
    pub key: String,
    pub value: OptionValue,
    pub last_updated: DateTime<Utc>,
    pub last_updated_by: UpdateChannel,
}

/// Durable tier holding persisted option values.
pub trait OptionsDatabase: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<StoredOption>>;
    /// Insert or replace the row for `option.key`
    fn upsert(&self, option: StoredOption) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// In-process stand-in for the shared cache tier.
pub struct MemoryCache {
    entries: DashMap<String, (OptionValue, DateTime<Utc>)>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<OptionValue>> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    fn set(&self, key: &str, value: &OptionValue, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| TesseraError::InvalidOperation(format!("ttl out of range: {}", e)))?;
        let expires = self.clock.now() + ttl;
        self.entries.insert(key.to_string(), (value.clone(), expires));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Volatile durable tier, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryDatabase {
    rows: RwLock<HashMap<String, StoredOption>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptionsDatabase for MemoryDatabase {
    fn get(&self, name: &str) -> Result<Option<StoredOption>> {
        Ok(self.rows.read().get(name).cloned())
    }

    fn upsert(&self, option: StoredOption) -> Result<()> {
        self.rows.write().insert(option.key.clone(), option);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.rows.write().remove(name);
        Ok(())
    }
}

/// Durable tier persisted as a single JSON document.
///
/// Every write rewrites the file through a temporary sibling and a rename.
pub struct JsonFileDatabase {
    path: PathBuf,
    rows: RwLock<HashMap<String, StoredOption>>,
}

impl JsonFileDatabase {
    /// Open the database, starting empty when the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let rows = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            HashMap::new()
        };

        info!(
            "Opened options database at {} ({} rows)",
            path.display(),
            rows.len()
        );
        Ok(Self {
            path,
            rows: RwLock::new(rows),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, rows: &HashMap<String, StoredOption>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(rows)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Persisted {} options to {}", rows.len(), self.path.display());
        Ok(())
    }
}

impl OptionsDatabase for JsonFileDatabase {
    fn get(&self, name: &str) -> Result<Option<StoredOption>> {
        Ok(self.rows.read().get(name).cloned())
    }

    fn upsert(&self, option: StoredOption) -> Result<()> {
        let mut rows = self.rows.write();
        let mut next = rows.clone();
        next.insert(option.key.clone(), option);
        self.persist(&next)?;
        *rows = next;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let mut rows = self.rows.write();
        if !rows.contains_key(name) {
            return Ok(());
        }
        let mut next = rows.clone();
        next.remove(name);
        self.persist(&next)?;
        *rows = next;
        Ok(())
    }
}

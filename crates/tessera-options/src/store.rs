//! Tiered read-through store for option values.
//!
//! Reads go local memory → shared cache → database, and fall back to a stale
//! local entry (within the key's grace window) when both remote tiers fail.
//! Writes go to the database first and then warm both cache tiers.

use crate::{KeyValueCache, OptionKey, OptionValue, OptionsDatabase, StoredOption, UpdateChannel};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Clock, Result};
use tracing::{debug, error, warn};

/// Storage contract the options manager reads and writes through.
///
/// `get` never fails: tier errors degrade to `None`.
pub trait BackingStore: Send + Sync {
    fn get(&self, key: &OptionKey, silent: bool) -> Option<OptionValue>;
    fn set(&self, key: &OptionKey, value: OptionValue, channel: UpdateChannel) -> Result<()>;
    fn delete(&self, key: &OptionKey) -> Result<()>;
    /// Warm the cache tiers without persisting
    fn set_cache(&self, key: &OptionKey, value: &OptionValue);
    fn get_last_update_channel(&self, key: &OptionKey) -> Option<UpdateChannel>;
    /// Whether a value is held by the durable tier; cache warmth does not count
    fn is_persisted(&self, key: &OptionKey) -> bool;
}

#[derive(Debug, Clone)]
struct LocalEntry {
    value: OptionValue,
    expires: DateTime<Utc>,
    grace_until: DateTime<Utc>,
}

/// Local memory + optional shared cache + durable database.
pub struct TieredStore {
    cache: Option<Arc<dyn KeyValueCache>>,
    database: Arc<dyn OptionsDatabase>,
    local: DashMap<String, LocalEntry>,
    clock: Arc<dyn Clock>,
}

impl TieredStore {
    pub fn new(
        cache: Option<Arc<dyn KeyValueCache>>,
        database: Arc<dyn OptionsDatabase>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            database,
            local: DashMap::new(),
            clock,
        }
    }

    /// Local entry if fresh, or if stale but inside grace and `force_grace` is set.
    ///
    /// Entries past grace are dropped on the way out.
    fn get_local_cache(&self, key: &OptionKey, force_grace: bool) -> Option<OptionValue> {
        let now = self.clock.now();
        let expired = {
            let entry = self.local.get(&key.cache_key)?;
            if now < entry.expires {
                return Some(entry.value.clone());
            }
            if force_grace && now < entry.grace_until {
                debug!("Serving stale value for {} within grace", key.name);
                return Some(entry.value.clone());
            }
            now >= entry.grace_until
        };

        if expired {
            self.local.remove(&key.cache_key);
        }
        None
    }

    fn set_local_cache(&self, key: &OptionKey, value: OptionValue) {
        let now = self.clock.now();
        let expires = now + to_chrono(key.ttl);
        let entry = LocalEntry {
            value,
            expires,
            grace_until: expires + to_chrono(key.grace),
        };
        self.local.insert(key.cache_key.clone(), entry);
    }

    fn get_cache(&self, key: &OptionKey, silent: bool) -> Option<OptionValue> {
        let cache = self.cache.as_ref()?;
        match cache.get(&key.cache_key) {
            Ok(Some(value)) => {
                self.set_local_cache(key, value.clone());
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                if !silent {
                    warn!("Unable to read {} from cache: {}", key.name, e);
                }
                None
            }
        }
    }

    fn get_store(&self, key: &OptionKey, silent: bool) -> Option<OptionValue> {
        match self.database.get(&key.name) {
            Ok(Some(stored)) => {
                // Only warm the caches after a successful round trip to the database
                self.set_cache(key, &stored.value);
                Some(stored.value)
            }
            Ok(None) => None,
            Err(e) => {
                if !silent {
                    error!("Unable to read {} from the options database: {}", key.name, e);
                }
                None
            }
        }
    }

    /// Drop local entries past their grace window
    pub fn clean_local_cache(&self) {
        let now = self.clock.now();
        self.local.retain(|_, entry| now < entry.grace_until);
    }

    pub fn flush_local_cache(&self) {
        self.local.clear();
    }

    pub fn local_cache_len(&self) -> usize {
        self.local.len()
    }
}

impl BackingStore for TieredStore {
    fn get(&self, key: &OptionKey, silent: bool) -> Option<OptionValue> {
        if let Some(value) = self.get_local_cache(key, false) {
            return Some(value);
        }
        if let Some(value) = self.get_cache(key, silent) {
            return Some(value);
        }
        if let Some(value) = self.get_store(key, silent) {
            return Some(value);
        }
        // Last ditch: a stale local value is better than nothing
        self.get_local_cache(key, true)
    }

    fn set(&self, key: &OptionKey, value: OptionValue, channel: UpdateChannel) -> Result<()> {
        self.database.upsert(StoredOption {
            key: key.name.clone(),
            value: value.clone(),
            last_updated: self.clock.now(),
            last_updated_by: channel,
        })?;
        self.set_cache(key, &value);
        Ok(())
    }

    fn delete(&self, key: &OptionKey) -> Result<()> {
        self.database.delete(&key.name)?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&key.cache_key) {
                warn!("Unable to evict {} from cache: {}", key.name, e);
            }
        }
        self.local.remove(&key.cache_key);
        Ok(())
    }

    fn set_cache(&self, key: &OptionKey, value: &OptionValue) {
        if let Some(cache) = &self.cache {
            if !key.ttl.is_zero() {
                if let Err(e) = cache.set(&key.cache_key, value, key.ttl) {
                    warn!("Unable to write {} to cache: {}", key.name, e);
                }
            }
        }
        self.set_local_cache(key, value.clone());
    }

    fn get_last_update_channel(&self, key: &OptionKey) -> Option<UpdateChannel> {
        match self.database.get(&key.name) {
            Ok(stored) => stored.map(|s| s.last_updated_by),
            Err(e) => {
                warn!("Unable to read update channel of {}: {}", key.name, e);
                None
            }
        }
    }

    fn is_persisted(&self, key: &OptionKey) -> bool {
        match self.database.get(&key.name) {
            Ok(stored) => stored.is_some(),
            Err(e) => {
                warn!("Unable to check whether {} is stored: {}", key.name, e);
                false
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    // Anything beyond a century is effectively "forever"
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

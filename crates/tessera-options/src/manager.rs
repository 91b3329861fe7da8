use crate::{
    BackingStore, DefaultFn, OptionFlags, OptionKey, OptionSpec, OptionType, OptionValue,
    OptionsError, Result, StaticConfig, TypeMismatch, UpdateChannel, MAX_KEY_LENGTH,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::OptionsConfig;
use tracing::{debug, info, warn};

/// Callback run after a value has been read from the store
pub type PostGetHook = Arc<dyn Fn(&OptionValue) + Send + Sync>;

/// Registry of option keys plus tiered value resolution.
///
/// You always get a value back from [`OptionsManager::get`]. Values are
/// eventually consistent: should both the cache and the database be
/// unreachable, reads fall back to static configuration and finally to the
/// registered default.
///
/// Registration is expected at startup, before concurrent reads begin.
/// Default producers run outside the registry lock and may read other
/// options through the same manager.
pub struct OptionsManager {
    store: Arc<dyn BackingStore>,
    static_config: Arc<StaticConfig>,
    registry: RwLock<HashMap<String, Arc<OptionKey>>>,
    /// Defaults published at registration time
    defaults: RwLock<HashMap<String, OptionValue>>,
    hooks: RwLock<HashMap<String, Vec<PostGetHook>>>,
    legacy_prefixes: Vec<String>,
    default_ttl: Duration,
    default_grace: Duration,
}

impl OptionsManager {
    pub fn new(store: Arc<dyn BackingStore>, static_config: Arc<StaticConfig>) -> Self {
        Self::with_config(store, static_config, &OptionsConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn BackingStore>,
        static_config: Arc<StaticConfig>,
        config: &OptionsConfig,
    ) -> Self {
        Self {
            store,
            static_config,
            registry: RwLock::new(HashMap::new()),
            defaults: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
            legacy_prefixes: config.legacy_prefixes.clone(),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            default_grace: Duration::from_secs(config.default_grace_secs),
        }
    }

    pub fn static_config(&self) -> &StaticConfig {
        &self.static_config
    }

    /// Register a new option.
    pub fn register(&self, spec: OptionSpec) -> Result<()> {
        let OptionSpec {
            name,
            default,
            ty,
            mut flags,
            ttl,
            grace,
            grouping_info,
        } = spec;

        if self.registry.read().contains_key(&name) {
            return Err(OptionsError::AlreadyRegistered(name));
        }
        if name.chars().count() > MAX_KEY_LENGTH {
            return Err(OptionsError::NameTooLong(name));
        }

        // No lock is held here: a producer may read other options
        let mut resolved = default.as_ref().and_then(|producer| producer());

        let ty = match ty {
            Some(ty) => ty,
            None => match resolved.as_ref().map(OptionType::infer) {
                Some(ty) => ty,
                // A producer that yields nothing leaves no way to pick a type
                None if default.is_some() => return Err(OptionsError::NoneType(name)),
                None => {
                    resolved = Some(OptionValue::String(String::new()));
                    OptionType::String
                }
            },
        };

        if let Some(value) = &resolved {
            if !ty.test(value) {
                return Err(OptionsError::TypeMismatch {
                    key: name,
                    source: TypeMismatch {
                        expected: ty,
                        got: value.kind().to_string(),
                    },
                });
            }
        }

        let default_value = resolved.unwrap_or_else(|| ty.default_value());
        let producer: DefaultFn = match default {
            Some(producer) => Arc::new(move || producer().unwrap_or_else(|| ty.default_value())),
            None => {
                let value = default_value.clone();
                Arc::new(move || value.clone())
            }
        };

        // "false" must not read as a missing value
        if matches!(default_value, OptionValue::Bool(_)) {
            flags |= OptionFlags::ALLOW_EMPTY;
        }

        let key = OptionKey::new(
            name.clone(),
            producer,
            ty,
            flags,
            ttl.unwrap_or(self.default_ttl),
            grace.unwrap_or(self.default_grace),
            grouping_info,
        );

        let mut registry = self.registry.write();
        if registry.contains_key(&name) {
            return Err(OptionsError::AlreadyRegistered(name));
        }
        self.defaults.write().insert(name.clone(), default_value);
        debug!("Registered option {} ({}, {:?})", name, ty, flags);
        registry.insert(name, Arc::new(key));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        match self.registry.write().remove(name) {
            Some(_) => {
                self.defaults.write().remove(name);
                Ok(())
            }
            None => Err(OptionsError::UnknownOption(name.to_string())),
        }
    }

    /// Resolve a name to its key.
    ///
    /// Unregistered names carrying a legacy prefix get an untyped placeholder
    /// key that is never cached.
    pub fn lookup_key(&self, name: &str) -> Result<Arc<OptionKey>> {
        if let Some(key) = self.registry.read().get(name) {
            return Ok(Arc::clone(key));
        }

        if self
            .legacy_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
        {
            debug!("Using legacy key: {}", name);
            return Ok(Arc::new(OptionKey::new(
                name,
                Arc::new(|| OptionValue::String(String::new())),
                OptionType::Any,
                OptionFlags::DEFAULT,
                Duration::ZERO,
                Duration::ZERO,
                None,
            )));
        }

        Err(OptionsError::UnknownOption(name.to_string()))
    }

    /// Value of an option, falling back to local configuration.
    ///
    /// Fails only for unknown options.
    pub fn get(&self, name: &str) -> Result<OptionValue> {
        self.get_with(name, false)
    }

    /// Like [`get`](Self::get); `silent` suppresses backend error logging.
    pub fn get_with(&self, name: &str, silent: bool) -> Result<OptionValue> {
        let opt = self.lookup_key(name)?;

        // A disk value for a disk-prioritized option wins without touching the network
        if opt.has_flag(OptionFlags::PRIORITIZE_DISK) {
            if let Some(value) = self.static_config.get(name) {
                return Ok(value.clone());
            }
        }

        if opt.is_storable() {
            if let Some(value) = self.store.get(&opt, silent) {
                self.run_post_get_hooks(name, &value);
                return Ok(value);
            }
        }

        let value = if opt.has_flag(OptionFlags::STOREONLY) {
            opt.default_value()
        } else if let Some(value) = self.static_config.get(name) {
            value.clone()
        } else if let Some(value) = self.static_config.default_options.get(name) {
            value.clone()
        } else {
            let published = self.defaults.read().get(name).cloned();
            published.unwrap_or_else(|| opt.default_value())
        };

        // Values found in the store are cached by the store itself; cache the
        // fallback here so the next read skips the database
        if opt.is_storable() {
            self.store.set_cache(&opt, &value);
        }
        Ok(value)
    }

    /// Set an option, coercing the value and tagging it with `Unknown`.
    pub fn set(&self, name: &str, value: impl Into<OptionValue>) -> Result<()> {
        self.set_with(name, value.into(), true, UpdateChannel::Unknown)
    }

    pub fn set_with(
        &self,
        name: &str,
        value: OptionValue,
        coerce: bool,
        channel: UpdateChannel,
    ) -> Result<()> {
        let opt = self.lookup_key(name)?;
        Self::check_runtime_mutable(&opt)?;
        if opt.has_flag(OptionFlags::PRIORITIZE_DISK) && self.static_config.get(name).is_some() {
            return Err(OptionsError::ImmutabilityViolation {
                key: name.to_string(),
                reason: "it is configured on disk",
            });
        }

        let value = if coerce {
            opt.ty
                .coerce(value)
                .map_err(|source| OptionsError::TypeMismatch {
                    key: name.to_string(),
                    source,
                })?
        } else if opt.ty.test(&value) {
            value
        } else {
            return Err(OptionsError::TypeMismatch {
                key: name.to_string(),
                source: TypeMismatch {
                    expected: opt.ty,
                    got: value.kind().to_string(),
                },
            });
        };

        self.store.set(&opt, value, channel)?;
        info!(option = name, channel = %channel, "Option updated");
        Ok(())
    }

    /// Permanently remove the stored value; the next `get` misses the store.
    pub fn delete(&self, name: &str) -> Result<()> {
        let opt = self.lookup_key(name)?;
        Self::check_runtime_mutable(&opt)?;
        self.store.delete(&opt)?;
        info!(option = name, "Option deleted");
        Ok(())
    }

    /// Whether the option has an explicit value rather than inheriting its default.
    pub fn isset(&self, name: &str) -> Result<bool> {
        let opt = self.lookup_key(name)?;
        if opt.is_storable() && self.store.is_persisted(&opt) {
            return Ok(true);
        }
        Ok(self.static_config.contains(name))
    }

    /// Validate a batch of options, typically the disk configuration.
    ///
    /// With `warn` set, unknown names are reported and skipped instead of failing.
    pub fn validate(&self, options: &HashMap<String, OptionValue>, warn: bool) -> Result<()> {
        let mut names: Vec<&String> = options.keys().collect();
        names.sort();

        for name in names {
            match self.validate_option(name, &options[name]) {
                Err(OptionsError::UnknownOption(unknown)) if warn => {
                    warn!("Unknown config option found: {}", unknown);
                }
                other => other?,
            }
        }
        Ok(())
    }

    pub fn validate_option(&self, name: &str, value: &OptionValue) -> Result<()> {
        let opt = self.lookup_key(name)?;
        if opt.has_flag(OptionFlags::STOREONLY) {
            return Err(OptionsError::StoreOnlyViolation(name.to_string()));
        }
        if !opt.ty.test(value) {
            return Err(OptionsError::TypeMismatch {
                key: name.to_string(),
                source: TypeMismatch {
                    expected: opt.ty,
                    got: value.kind().to_string(),
                },
            });
        }
        Ok(())
    }

    /// Every registered key, sorted by name
    pub fn all(&self) -> Vec<Arc<OptionKey>> {
        let mut keys: Vec<Arc<OptionKey>> = self.registry.read().values().cloned().collect();
        keys.sort_by(|a, b| a.name.cmp(&b.name));
        keys
    }

    /// Keys carrying `flag`.
    ///
    /// `None` returns everything; `DEFAULT` matches keys whose flags are exactly
    /// `DEFAULT`; any other flag matches keys sharing at least one bit with it.
    pub fn filter(&self, flag: Option<OptionFlags>) -> Vec<Arc<OptionKey>> {
        let all = self.all();
        match flag {
            None => all,
            Some(OptionFlags::DEFAULT) => all
                .into_iter()
                .filter(|key| key.flags == OptionFlags::DEFAULT)
                .collect(),
            Some(flag) => all.into_iter().filter(|key| key.has_flag(flag)).collect(),
        }
    }

    /// How the option was last changed, if it was ever stored
    pub fn get_last_update_channel(&self, name: &str) -> Result<Option<UpdateChannel>> {
        let opt = self.lookup_key(name)?;
        Ok(self.store.get_last_update_channel(&opt))
    }

    /// Run `hook` whenever a value for `name` is served from the store.
    pub fn add_post_get_hook<F>(&self, name: &str, hook: F)
    where
        F: Fn(&OptionValue) + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(hook));
    }

    /// Required options that currently resolve to an empty value
    pub fn unconfigured_required(&self) -> Vec<String> {
        self.filter(Some(OptionFlags::REQUIRED))
            .into_iter()
            .filter(|key| !key.has_flag(OptionFlags::ALLOW_EMPTY))
            .filter(|key| {
                self.get_with(&key.name, true)
                    .map(|value| value.is_empty())
                    .unwrap_or(true)
            })
            .map(|key| key.name.clone())
            .collect()
    }

    fn run_post_get_hooks(&self, name: &str, value: &OptionValue) {
        let hooks = match self.hooks.read().get(name) {
            Some(hooks) => hooks.clone(),
            None => return,
        };
        for hook in hooks {
            hook(value);
        }
    }

    fn check_runtime_mutable(opt: &OptionKey) -> Result<()> {
        if opt.has_flag(OptionFlags::NOSTORE) {
            return Err(OptionsError::ImmutabilityViolation {
                key: opt.name.clone(),
                reason: "it only exists on disk",
            });
        }
        if opt.has_flag(OptionFlags::IMMUTABLE) {
            return Err(OptionsError::ImmutabilityViolation {
                key: opt.name.clone(),
                reason: "it is immutable",
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for OptionsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsManager")
            .field("registered", &self.registry.read().len())
            .field("legacy_prefixes", &self.legacy_prefixes)
            .finish_non_exhaustive()
    }
}

/// Keep a runtime copy of an option up to date with values read from the store.
///
/// Handy for settings other components read directly, such as a URL prefix.
pub fn mirror_option(manager: &OptionsManager, name: &str) -> Arc<RwLock<Option<OptionValue>>> {
    let mirror = Arc::new(RwLock::new(None));
    let target = Arc::clone(&mirror);
    manager.add_post_get_hook(name, move |value| {
        *target.write() = Some(value.clone());
    });
    mirror
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryDatabase, TieredStore};
    use tessera_core::ManualClock;

    fn manager() -> OptionsManager {
        let store = TieredStore::new(
            None,
            Arc::new(MemoryDatabase::new()),
            Arc::new(ManualClock::from_timestamp(0)),
        );
        OptionsManager::new(Arc::new(store), Arc::new(StaticConfig::new()))
    }

    #[test]
    fn test_unspecified_default_is_empty_string() {
        let manager = manager();
        manager.register(OptionSpec::new("foo")).unwrap();
        let key = manager.lookup_key("foo").unwrap();
        assert_eq!(key.ty, OptionType::String);
        assert_eq!(manager.get("foo").unwrap(), OptionValue::from(""));
    }

    #[test]
    fn test_typed_none_default_uses_type_default() {
        let manager = manager();
        manager
            .register(OptionSpec::new("bar").default_none().ty(OptionType::Int))
            .unwrap();
        assert_eq!(manager.get("bar").unwrap(), OptionValue::Int(0));
    }

    #[test]
    fn test_unregister() {
        let manager = manager();
        manager.register(OptionSpec::new("foo").default(1)).unwrap();
        manager.unregister("foo").unwrap();
        assert!(matches!(
            manager.unregister("foo"),
            Err(OptionsError::UnknownOption(_))
        ));
        // re-registration is allowed once unregistered
        manager.register(OptionSpec::new("foo").default("x")).unwrap();
        assert_eq!(manager.get("foo").unwrap(), OptionValue::from("x"));
    }
}

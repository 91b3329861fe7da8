use crate::OptionValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tessera_core::{Result, TesseraError};
use tracing::info;

/// Options fixed at process start.
///
/// `options` is the disk configuration; a `null` entry counts as "present"
/// for `isset` but never as a value. `default_options` are process-level
/// alternate defaults consulted before an option's registered default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub options: HashMap<String, Option<OptionValue>>,

    #[serde(default)]
    pub default_options: HashMap<String, OptionValue>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a disk value
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.options.insert(name.into(), Some(value.into()));
        self
    }

    /// Load from a YAML, TOML or JSON file, picked by extension (YAML otherwise)
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StaticConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };

        info!(
            "Loaded {} static options from {}",
            config.options.len(),
            path.display()
        );
        Ok(config)
    }

    /// Parse YAML (or JSON) text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(TesseraError::from)
    }

    /// Non-null disk value for `name`
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name).and_then(Option::as_ref)
    }

    /// Whether `name` appears on disk at all, even as null
    pub fn contains(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Non-null disk values, used for bulk validation
    pub fn values(&self) -> HashMap<String, OptionValue> {
        self.options
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}

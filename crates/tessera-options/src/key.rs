use crate::{OptionFlags, OptionType, OptionValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum length of an option name, in characters
pub const MAX_KEY_LENGTH: usize = 128;

/// How long a key lives in local memory before being evicted
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(10);

/// How long a key lives in local memory *after* ttl while the backing store errors
pub const DEFAULT_KEY_GRACE: Duration = Duration::from_secs(60);

/// Producer of a registered option's default value
pub type DefaultFn = Arc<dyn Fn() -> OptionValue + Send + Sync>;

/// Producer supplied at registration; `None` means "default to None"
pub type SpecDefaultFn = Arc<dyn Fn() -> Option<OptionValue> + Send + Sync>;

/// Admin UI grouping metadata, only meaningful for admin-modifiable options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupingInfo {
    pub name: String,
    pub order: i32,
}

/// Derive the cache key for an option name
pub fn make_cache_key(name: &str) -> String {
    format!("o:{:x}", Sha256::digest(name.as_bytes()))
}

/// Immutable descriptor of a registered option.
#[derive(Clone)]
pub struct OptionKey {
    pub name: String,
    default: DefaultFn,
    pub ty: OptionType,
    pub flags: OptionFlags,
    pub ttl: Duration,
    pub grace: Duration,
    pub cache_key: String,
    pub grouping_info: Option<GroupingInfo>,
}

impl OptionKey {
    pub fn new(
        name: impl Into<String>,
        default: DefaultFn,
        ty: OptionType,
        flags: OptionFlags,
        ttl: Duration,
        grace: Duration,
        grouping_info: Option<GroupingInfo>,
    ) -> Self {
        let name = name.into();
        let cache_key = make_cache_key(&name);
        Self {
            name,
            default,
            ty,
            flags,
            ttl,
            grace,
            cache_key,
            grouping_info,
        }
    }

    /// Evaluate the registered default
    pub fn default_value(&self) -> OptionValue {
        (self.default)()
    }

    pub fn has_flag(&self, flag: OptionFlags) -> bool {
        self.flags.intersects(flag)
    }

    /// Whether the option may live in the backing store at all
    pub fn is_storable(&self) -> bool {
        !self.has_flag(OptionFlags::NOSTORE)
    }
}

impl fmt::Debug for OptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionKey")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("flags", &self.flags)
            .field("ttl", &self.ttl)
            .field("grace", &self.grace)
            .field("cache_key", &self.cache_key)
            .field("grouping_info", &self.grouping_info)
            .finish_non_exhaustive()
    }
}

/// Registration request for an option.
///
/// ```
/// use tessera_options::{OptionFlags, OptionSpec, OptionType};
///
/// let spec = OptionSpec::new("system.rate-limit")
///     .default(0)
///     .ty(OptionType::Int)
///     .flags(OptionFlags::ADMIN_MODIFIABLE);
/// assert_eq!(spec.name(), "system.rate-limit");
/// ```
#[derive(Clone)]
pub struct OptionSpec {
    pub(crate) name: String,
    pub(crate) default: Option<SpecDefaultFn>,
    pub(crate) ty: Option<OptionType>,
    pub(crate) flags: OptionFlags,
    pub(crate) ttl: Option<Duration>,
    pub(crate) grace: Option<Duration>,
    pub(crate) grouping_info: Option<GroupingInfo>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            ty: None,
            flags: OptionFlags::DEFAULT,
            ttl: None,
            grace: None,
            grouping_info: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed default value
    pub fn default(mut self, value: impl Into<OptionValue>) -> Self {
        let value = value.into();
        self.default = Some(Arc::new(move || Some(value.clone())));
        self
    }

    /// Default evaluated on every fallback
    pub fn default_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Option<OptionValue> + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(producer));
        self
    }

    /// Explicit "no value" default; the declared type supplies one instead
    pub fn default_none(self) -> Self {
        self.default_with(|| None)
    }

    pub fn ty(mut self, ty: OptionType) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn flags(mut self, flags: OptionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    pub fn grouping(mut self, name: impl Into<String>, order: i32) -> Self {
        self.grouping_info = Some(GroupingInfo {
            name: name.into(),
            order,
        });
        self
    }
}

impl fmt::Debug for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionSpec")
            .field("name", &self.name)
            .field("has_default", &self.default.is_some())
            .field("ty", &self.ty)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Provenance of an option update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateChannel {
    /// Legacy changes made by code that is not aware of channels
    #[default]
    Unknown,
    /// Any change made directly by the application
    Application,
    /// Changes made through the admin UI
    Admin,
    /// Changes made by the options automator
    Automator,
    /// Changes made through the CLI, except killswitches
    Cli,
    /// Changes made through the killswitch CLI
    Killswitch,
}

impl UpdateChannel {
    pub const ALL: [UpdateChannel; 6] = [
        UpdateChannel::Unknown,
        UpdateChannel::Application,
        UpdateChannel::Admin,
        UpdateChannel::Automator,
        UpdateChannel::Cli,
        UpdateChannel::Killswitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateChannel::Unknown => "unknown",
            UpdateChannel::Application => "application",
            UpdateChannel::Admin => "admin",
            UpdateChannel::Automator => "automator",
            UpdateChannel::Cli => "cli",
            UpdateChannel::Killswitch => "killswitch",
        }
    }
}

impl fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpdateChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpdateChannel::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown update channel: {}", s))
    }
}

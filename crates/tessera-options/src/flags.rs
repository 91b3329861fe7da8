use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Governance bits attached to every option key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptionFlags(u32);

impl OptionFlags {
    pub const NONE: OptionFlags = OptionFlags(0);
    pub const DEFAULT: OptionFlags = OptionFlags(1 << 0);
    /// Value can't be changed at runtime
    pub const IMMUTABLE: OptionFlags = OptionFlags(1 << 1);
    /// Never read from or written to the store; the option only exists on disk
    pub const NOSTORE: OptionFlags = OptionFlags(1 << 2);
    /// Only lives in the store and must not appear in config files
    pub const STOREONLY: OptionFlags = OptionFlags(1 << 3);
    /// Must be defined for setup to be considered complete
    pub const REQUIRED: OptionFlags = OptionFlags(1 << 4);
    /// A value on disk wins over the store and freezes the option
    pub const PRIORITIZE_DISK: OptionFlags = OptionFlags(1 << 5);
    /// An empty value still counts as valid
    pub const ALLOW_EMPTY: OptionFlags = OptionFlags(1 << 6);
    /// Credentials are hidden from listings
    pub const CREDENTIAL: OptionFlags = OptionFlags(1 << 7);
    /// Meant to be modified live, e.g. for rollouts
    pub const ADMIN_MODIFIABLE: OptionFlags = OptionFlags(1 << 8);
    pub const RATE: OptionFlags = OptionFlags(1 << 9);
    pub const BOOL: OptionFlags = OptionFlags(1 << 10);

    pub const MODIFIABLE_RATE: OptionFlags = OptionFlags(Self::ADMIN_MODIFIABLE.0 | Self::RATE.0);
    pub const MODIFIABLE_BOOL: OptionFlags = OptionFlags(Self::ADMIN_MODIFIABLE.0 | Self::BOOL.0);

    const NAMES: [(&'static str, OptionFlags); 11] = [
        ("default", Self::DEFAULT),
        ("immutable", Self::IMMUTABLE),
        ("nostore", Self::NOSTORE),
        ("storeonly", Self::STOREONLY),
        ("required", Self::REQUIRED),
        ("prioritize-disk", Self::PRIORITIZE_DISK),
        ("allow-empty", Self::ALLOW_EMPTY),
        ("credential", Self::CREDENTIAL),
        ("admin-modifiable", Self::ADMIN_MODIFIABLE),
        ("rate", Self::RATE),
        ("bool", Self::BOOL),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// All bits of `other` are set
    pub const fn contains(self, other: OptionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// At least one bit of `other` is set
    pub const fn intersects(self, other: OptionFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Parse a single flag by its kebab-case name
    pub fn from_name(name: &str) -> Option<OptionFlags> {
        Self::NAMES
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, flag)| *flag)
    }

    /// Names of the individual flags set
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl BitOr for OptionFlags {
    type Output = OptionFlags;

    fn bitor(self, rhs: OptionFlags) -> OptionFlags {
        OptionFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OptionFlags {
    fn bitor_assign(&mut self, rhs: OptionFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for OptionFlags {
    type Output = OptionFlags;

    fn bitand(self, rhs: OptionFlags) -> OptionFlags {
        OptionFlags(self.0 & rhs.0)
    }
}

impl fmt::Debug for OptionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OptionFlags({})", self.names().join(" | "))
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub u64);

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: OrganizationId,
    pub name: String,
}

impl Project {
    pub fn new(id: u64, organization_id: u64, name: impl Into<String>) -> Self {
        Self {
            id: ProjectId(id),
            organization_id: OrganizationId(organization_id),
            name: name.into(),
        }
    }
}

/// How the SDK derived a transaction's name.
///
/// Only `Url` names are raw enough to need clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionSource {
    Url,
    Route,
    View,
    Component,
    Task,
    Custom,
    Unknown,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Url => "url",
            TransactionSource::Route => "route",
            TransactionSource::View => "view",
            TransactionSource::Component => "component",
            TransactionSource::Task => "task",
            TransactionSource::Custom => "custom",
            TransactionSource::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "url" => Ok(TransactionSource::Url),
            "route" => Ok(TransactionSource::Route),
            "view" => Ok(TransactionSource::View),
            "component" => Ok(TransactionSource::Component),
            "task" => Ok(TransactionSource::Task),
            "custom" => Ok(TransactionSource::Custom),
            "unknown" => Ok(TransactionSource::Unknown),
            other => Err(format!("unknown transaction source: {}", other)),
        }
    }
}

impl fmt::Display for TransactionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of an ingested transaction the clusterer looks at
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub transaction: Option<String>,
    pub source: Option<TransactionSource>,
}

impl TransactionEvent {
    pub fn new(transaction: Option<&str>, source: Option<TransactionSource>) -> Self {
        Self {
            transaction: transaction.map(str::to_string),
            source,
        }
    }
}

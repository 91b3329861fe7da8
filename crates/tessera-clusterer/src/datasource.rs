use crate::{OrganizationId, Project, ProjectId, Result, TransactionEvent, TransactionSource};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Clock, ClustererConfig};
use tracing::{debug, error};

/// Feature gating transaction name recording per organization
pub const CLUSTERER_FEATURE: &str = "organizations:transaction-name-clusterer";

/// Bounded per-project store of sampled transaction names.
pub trait SampleSet: Send + Sync {
    fn add(&self, project: ProjectId, name: &str) -> Result<()>;
    /// Current samples of a project; empty when it has none
    fn get(&self, project: ProjectId) -> Result<Vec<String>>;
    /// Projects currently holding samples, sorted by id
    fn projects(&self) -> Result<Vec<ProjectId>>;
}

#[derive(Debug)]
struct ProjectSamples {
    names: Vec<String>,
    members: HashSet<String>,
    last_write: DateTime<Utc>,
}

impl ProjectSamples {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            names: Vec::new(),
            members: HashSet::new(),
            last_write: now,
        }
    }

    fn evict(&mut self, index: usize) {
        let evicted = self.names.swap_remove(index);
        self.members.remove(&evicted);
    }

    fn clear(&mut self) {
        self.names.clear();
        self.members.clear();
    }
}

/// In-memory sample set with random eviction.
///
/// A full set drops a uniformly random member to make room, so newer names
/// are more likely to survive than older ones. Sets untouched for longer than
/// the ttl are treated as empty.
pub struct MemorySampleSet {
    sets: DashMap<ProjectId, ProjectSamples>,
    max_size: usize,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    rng: Mutex<fastrand::Rng>,
}

impl MemorySampleSet {
    pub fn new(max_size: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sets: DashMap::new(),
            max_size,
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1)),
            clock,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }

    pub fn from_config(config: &ClustererConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config.sample_set_size,
            Duration::from_secs(config.sample_set_ttl_secs),
            clock,
        )
    }

    /// Make eviction reproducible
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self, project: ProjectId) -> usize {
        let now = self.clock.now();
        self.sets
            .get(&project)
            .filter(|samples| !self.is_expired(samples, now))
            .map(|samples| samples.names.len())
            .unwrap_or(0)
    }

    /// Drop sets past their ttl, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.sets.len();
        self.sets.retain(|_, samples| !self.is_expired(samples, now));
        let purged = before.saturating_sub(self.sets.len());
        if purged > 0 {
            debug!("Purged {} expired sample sets", purged);
        }
        purged
    }

    fn is_expired(&self, samples: &ProjectSamples, now: DateTime<Utc>) -> bool {
        now >= samples.last_write + self.ttl
    }
}

impl SampleSet for MemorySampleSet {
    fn add(&self, project: ProjectId, name: &str) -> Result<()> {
        if self.max_size == 0 {
            return Ok(());
        }

        let now = self.clock.now();
        let mut samples = self
            .sets
            .entry(project)
            .or_insert_with(|| ProjectSamples::new(now));

        if self.is_expired(&samples, now) {
            samples.clear();
        }
        samples.last_write = now;

        if samples.members.contains(name) {
            return Ok(());
        }

        if samples.names.len() >= self.max_size {
            let index = self.rng.lock().usize(..samples.names.len());
            samples.evict(index);
        }
        samples.names.push(name.to_string());
        samples.members.insert(name.to_string());
        Ok(())
    }

    fn get(&self, project: ProjectId) -> Result<Vec<String>> {
        let now = self.clock.now();
        Ok(self
            .sets
            .get(&project)
            .filter(|samples| !self.is_expired(samples, now))
            .map(|samples| samples.names.clone())
            .unwrap_or_default())
    }

    fn projects(&self) -> Result<Vec<ProjectId>> {
        let now = self.clock.now();
        let mut projects: Vec<ProjectId> = self
            .sets
            .iter()
            .filter(|entry| !entry.names.is_empty() && !self.is_expired(entry.value(), now))
            .map(|entry| *entry.key())
            .collect();
        projects.sort();
        Ok(projects)
    }
}

/// Feature flag lookup per organization
pub trait FeatureFlags: Send + Sync {
    fn has(&self, feature: &str, organization: OrganizationId) -> bool;
}

/// Feature flags held in memory, enabled globally or per organization.
#[derive(Debug, Default)]
pub struct StaticFeatureFlags {
    global: RwLock<HashSet<String>>,
    per_organization: RwLock<HashSet<(String, OrganizationId)>>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, feature: &str) {
        self.global.write().insert(feature.to_string());
    }

    pub fn disable(&self, feature: &str) {
        self.global.write().remove(feature);
        self.per_organization
            .write()
            .retain(|(name, _)| name != feature);
    }

    pub fn enable_for(&self, feature: &str, organization: OrganizationId) {
        self.per_organization
            .write()
            .insert((feature.to_string(), organization));
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn has(&self, feature: &str, organization: OrganizationId) -> bool {
        self.global.read().contains(feature)
            || self
                .per_organization
                .read()
                .contains(&(feature.to_string(), organization))
    }
}

/// Feeds URL transaction names of ingested events into the sample set.
pub struct TransactionRecorder {
    sample_set: Arc<dyn SampleSet>,
    features: Arc<dyn FeatureFlags>,
}

impl TransactionRecorder {
    pub fn new(sample_set: Arc<dyn SampleSet>, features: Arc<dyn FeatureFlags>) -> Self {
        Self {
            sample_set,
            features,
        }
    }

    /// Sample the event's transaction name if it is eligible for clustering.
    ///
    /// Returns whether the name was written. Storage failures are logged only.
    pub fn record_transaction_name(&self, project: &Project, event: &TransactionEvent) -> bool {
        let name = match event.transaction.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return false,
        };
        if event.source != Some(TransactionSource::Url) {
            return false;
        }
        if !self.features.has(CLUSTERER_FEATURE, project.organization_id) {
            return false;
        }

        match self.sample_set.add(project.id, name) {
            Ok(()) => {
                counter!("txnames.recorded").increment(1);
                true
            }
            Err(e) => {
                error!(
                    "Failed to record transaction name for project {}: {}",
                    project.id, e
                );
                counter!("txnames.record_failures").increment(1);
                false
            }
        }
    }
}

use crate::{
    ClustererError, Clusterer, ProjectId, ReplacementRule, Result, RuleStore, SampleSet,
    TreeClusterer,
};
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tessera_core::{Clock, ClustererConfig};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, error, info, warn};

/// Hands a batch of projects to whatever runs the clustering.
pub trait TaskDispatcher: Send + Sync {
    fn dispatch(&self, batch: Vec<ProjectId>) -> Result<()>;
}

/// Clusters the samples of a batch of projects and stores the resulting rules.
pub struct ClusterWorker {
    sample_set: Arc<dyn SampleSet>,
    rule_store: RuleStore,
    merge_threshold: usize,
    clock: Arc<dyn Clock>,
}

impl ClusterWorker {
    pub fn new(
        sample_set: Arc<dyn SampleSet>,
        rule_store: RuleStore,
        merge_threshold: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sample_set,
            rule_store,
            merge_threshold,
            clock,
        }
    }

    /// Cluster every project in `projects`, returning how many succeeded.
    ///
    /// A failing project is logged and skipped.
    pub fn cluster_projects(&self, projects: &[ProjectId]) -> usize {
        let mut succeeded = 0;
        for &project in projects {
            let start = Instant::now();
            match self.cluster_project(project) {
                Ok(rules) => {
                    debug!("Project {} produced {} rules", project, rules.len());
                    counter!("txnames.clusterer.rules_produced").increment(rules.len() as u64);
                    succeeded += 1;
                }
                Err(e) => {
                    error!("Failed to cluster transactions of project {}: {}", project, e);
                    counter!("txnames.clusterer.project_failures").increment(1);
                }
            }
            histogram!("txnames.clusterer.project_duration").record(start.elapsed());
        }
        succeeded
    }

    pub fn cluster_project(&self, project: ProjectId) -> Result<Vec<ReplacementRule>> {
        let names = self.sample_set.get(project)?;

        let mut clusterer = TreeClusterer::new(self.merge_threshold);
        clusterer.add_input(&names);
        let rules = clusterer.get_rules();

        self.rule_store
            .update_rules(project, &rules, self.clock.now())?;
        Ok(rules)
    }

    /// Consume batches until every sender is gone, returning the number handled.
    pub async fn run(self: Arc<Self>, receiver: Receiver<Vec<ProjectId>>) -> usize {
        let mut batches = ReceiverStream::new(receiver);
        let mut handled = 0;

        while let Some(batch) = batches.next().await {
            info!("Clustering batch of {} projects", batch.len());
            let worker = Arc::clone(&self);
            // Clustering is CPU bound, keep it off the async workers
            let result = tokio::task::spawn_blocking(move || worker.cluster_projects(&batch)).await;
            if let Err(e) = result {
                error!("Clustering task panicked: {}", e);
            }
            handled += 1;
        }

        info!("Cluster worker stopped after {} batches", handled);
        handled
    }
}

/// Runs batches on the calling thread.
pub struct InlineDispatcher {
    worker: Arc<ClusterWorker>,
}

impl InlineDispatcher {
    pub fn new(worker: Arc<ClusterWorker>) -> Self {
        Self { worker }
    }
}

impl TaskDispatcher for InlineDispatcher {
    fn dispatch(&self, batch: Vec<ProjectId>) -> Result<()> {
        self.worker.cluster_projects(&batch);
        Ok(())
    }
}

/// Queues batches for a [`ClusterWorker::run`] loop.
pub struct ChannelDispatcher {
    sender: Sender<Vec<ProjectId>>,
}

impl ChannelDispatcher {
    pub fn new(buffer_size: usize) -> (Self, Receiver<Vec<ProjectId>>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        (Self { sender }, receiver)
    }
}

impl TaskDispatcher for ChannelDispatcher {
    fn dispatch(&self, batch: Vec<ProjectId>) -> Result<()> {
        self.sender.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => ClustererError::Dispatch("queue is full".to_string()),
            TrySendError::Closed(_) => ClustererError::Dispatch("worker has stopped".to_string()),
        })
    }
}

/// Periodically splits sampled projects into batches for clustering.
pub struct ClusterScheduler {
    sample_set: Arc<dyn SampleSet>,
    dispatcher: Arc<dyn TaskDispatcher>,
    config: ClustererConfig,
}

impl ClusterScheduler {
    pub fn new(
        sample_set: Arc<dyn SampleSet>,
        dispatcher: Arc<dyn TaskDispatcher>,
        config: ClustererConfig,
    ) -> Self {
        Self {
            sample_set,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &ClustererConfig {
        &self.config
    }

    pub fn set_projects_per_task(&mut self, projects_per_task: usize) {
        self.config.projects_per_task = projects_per_task;
    }

    /// Dispatch every project with samples, `projects_per_task` at a time.
    ///
    /// Returns the number of batches dispatched; zero when clustering is disabled.
    pub fn spawn_clusterers(&self) -> Result<usize> {
        if !self.config.enabled {
            debug!("Transaction clusterer is disabled");
            return Ok(0);
        }

        let projects = self.sample_set.projects()?;
        let mut dispatched = 0;
        for batch in projects.chunks(self.config.projects_per_task.max(1)) {
            match self.dispatcher.dispatch(batch.to_vec()) {
                Ok(()) => dispatched += 1,
                Err(e) => {
                    warn!("Dropping batch of {} projects: {}", batch.len(), e);
                    counter!("txnames.clusterer.dispatch_failures").increment(1);
                }
            }
        }

        counter!("txnames.clusterer.batches_spawned").increment(dispatched as u64);
        info!(
            "Spawned {} clustering batches for {} projects",
            dispatched,
            projects.len()
        );
        Ok(dispatched)
    }
}

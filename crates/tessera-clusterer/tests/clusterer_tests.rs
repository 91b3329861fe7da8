use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessera_clusterer::*;
use tessera_core::{ClustererConfig, ManualClock};

const DAY: Duration = Duration::from_secs(86_400);

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::from_timestamp(1_334_318_401))
}

/// Counts writes instead of storing anything
#[derive(Default)]
struct CountingSampleSet {
    writes: AtomicUsize,
}

impl SampleSet for CountingSampleSet {
    fn add(&self, _project: ProjectId, _name: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, _project: ProjectId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn projects(&self) -> Result<Vec<ProjectId>> {
        Ok(Vec::new())
    }
}

struct BrokenSampleSet;

impl SampleSet for BrokenSampleSet {
    fn add(&self, _project: ProjectId, _name: &str) -> Result<()> {
        Err(ClustererError::SampleSet("connection reset".to_string()))
    }

    fn get(&self, _project: ProjectId) -> Result<Vec<String>> {
        Err(ClustererError::SampleSet("connection reset".to_string()))
    }

    fn projects(&self) -> Result<Vec<ProjectId>> {
        Ok(vec![ProjectId(1)])
    }
}

#[test]
fn test_multi_fanout() {
    let mut clusterer = TreeClusterer::new(3);
    clusterer.add_input([
        "/a/b0/c/d0/e",
        "/a/b0/c/d1/e",
        "/a/b0/c/d2/e",
        "/a/b1/c/d0/e",
        "/a/b1/c/d1/e/",
        "/a/b1/c/d2/e",
        "/a/b2/c/d0/e",
        "/a/b2/c/d1/e/",
        "/a/b2/c/d2/e",
        "/a/b2/c1/d2/e",
    ]);
    assert_eq!(clusterer.get_rules(), vec!["/a/*/c/*/**", "/a/*/**"]);
}

#[test]
fn test_single_leaf() {
    let mut clusterer = TreeClusterer::new(2);
    clusterer.add_input(["/a/b1/c/", "/a/b2/c/"]);
    assert_eq!(clusterer.get_rules(), vec!["/a/*/**"]);
}

#[test]
fn test_merge_threshold_is_inclusive() {
    let names = ["/a/b0", "/a/b1", "/a/b2"];

    let mut at_threshold = TreeClusterer::new(3);
    at_threshold.add_input(names);
    assert_eq!(at_threshold.get_rules(), vec!["/a/*/**"]);

    let mut below_threshold = TreeClusterer::new(4);
    below_threshold.add_input(names);
    assert!(below_threshold.get_rules().is_empty());
}

#[test]
fn test_get_rules_is_repeatable() {
    let mut clusterer = TreeClusterer::new(2);
    clusterer.add_input(["/a/b1/c/"]);
    assert!(clusterer.get_rules().is_empty());

    clusterer.add_input(["/a/b2/c/"]);
    let first = clusterer.get_rules();
    assert_eq!(first, clusterer.get_rules());
    assert_eq!(first, vec!["/a/*/**"]);
}

#[test]
fn test_collection() {
    let samples = MemorySampleSet::new(5, DAY, clock()).with_seed(7);
    let project1 = Project::new(101, 1, "p1");
    let project2 = Project::new(102, 1, "project2");

    for project in [&project1, &project2] {
        for i in 0..project.name.len() {
            let name = format!("tx-{}-{}", project.name, i);
            samples.add(project.id, &name).unwrap();
            samples.add(project.id, &name).unwrap();
        }
    }

    let entries1: HashSet<String> = samples.get(project1.id).unwrap().into_iter().collect();
    let expected: HashSet<String> = ["tx-p1-0", "tx-p1-1"].iter().map(|s| s.to_string()).collect();
    assert_eq!(entries1, expected);

    let entries2 = samples.get(project2.id).unwrap();
    assert_eq!(entries2.len(), 5, "{:?}", entries2);
    assert!(entries2.iter().all(|name| name.starts_with("tx-project2-")));

    assert!(samples.get(ProjectId(103)).unwrap().is_empty());
    assert_eq!(samples.projects().unwrap(), vec![ProjectId(101), ProjectId(102)]);
}

#[test]
fn test_concurrent_adds_respect_bound() {
    let samples = MemorySampleSet::new(50, DAY, clock());
    let project = ProjectId(104);

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let samples = &samples;
            scope.spawn(move || {
                for i in 0..200 {
                    samples.add(project, &format!("/t{}/{}", thread, i)).unwrap();
                }
            });
        }
    });

    let inserted: HashSet<String> = (0..8)
        .flat_map(|thread| (0..200).map(move |i| format!("/t{}/{}", thread, i)))
        .collect();
    let names = samples.get(project).unwrap();
    let unique: HashSet<&String> = names.iter().collect();

    assert_eq!(samples.len(project), 50);
    assert_eq!(names.len(), 50);
    assert_eq!(unique.len(), 50);
    assert!(names.iter().all(|name| inserted.contains(name)));
}

#[test]
fn test_distribution_prefers_recent_names() {
    let samples = MemorySampleSet::new(100, DAY, clock()).with_seed(42);
    let project = ProjectId(103);
    for i in 0..1000 {
        samples.add(project, &i.to_string()).unwrap();
    }

    let names = samples.get(project).unwrap();
    assert_eq!(names.len(), 100);

    let freshness: f64 = names
        .iter()
        .map(|name| name.parse::<f64>().unwrap())
        .sum::<f64>()
        / 100.0;
    // usually around 900
    assert!(freshness > 800.0, "{}", freshness);
}

#[test]
fn test_record_transactions() {
    let cases = [
        (Some(TransactionSource::Url), Some("/a/b/c"), true, 1),
        (Some(TransactionSource::Route), Some("/"), true, 0),
        (Some(TransactionSource::Url), None, true, 0),
        (Some(TransactionSource::Url), Some(""), true, 0),
        (Some(TransactionSource::Url), Some("/"), false, 0),
        (Some(TransactionSource::Route), None, false, 0),
        (None, Some("/a/b/c"), true, 0),
    ];

    for (source, txname, feature_enabled, expected) in cases {
        let samples = Arc::new(CountingSampleSet::default());
        let features = Arc::new(StaticFeatureFlags::new());
        if feature_enabled {
            features.enable_for(CLUSTERER_FEATURE, OrganizationId(9));
        }
        let recorder = TransactionRecorder::new(samples.clone(), features);

        let project = Project::new(111, 9, "project");
        let recorded = recorder.record_transaction_name(&project, &TransactionEvent::new(txname, source));

        assert_eq!(
            samples.writes.load(Ordering::SeqCst),
            expected,
            "source={:?} txname={:?} feature={}",
            source,
            txname,
            feature_enabled
        );
        assert_eq!(recorded, expected == 1);
    }
}

#[test]
fn test_record_swallows_storage_errors() {
    let features = Arc::new(StaticFeatureFlags::new());
    features.enable(CLUSTERER_FEATURE);
    let recorder = TransactionRecorder::new(Arc::new(BrokenSampleSet), features);

    let event = TransactionEvent::new(Some("/a/b"), Some(TransactionSource::Url));
    assert!(!recorder.record_transaction_name(&Project::new(1, 1, "p"), &event));
}

#[test]
fn test_save_rules() {
    let store = RuleStore::in_memory();
    let project = ProjectId(111);
    assert!(store.get_rules(project).unwrap().is_empty());

    let first = Utc.with_ymd_and_hms(2012, 4, 13, 12, 0, 1).unwrap();
    assert_eq!(first.timestamp(), 1_334_318_401);
    store
        .update_rules(project, &["foo".into(), "bar".into()], first)
        .unwrap();

    let rules = store.get_rules(project).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[&ReplacementRule::new("foo")], 1_334_318_401);
    assert_eq!(rules[&ReplacementRule::new("bar")], 1_334_318_401);

    let second = first + chrono::Duration::seconds(1);
    store
        .update_rules(project, &["bar".into(), "zap".into()], second)
        .unwrap();

    let rules = store.get_rules(project).unwrap();
    assert_eq!(rules.len(), 3);
    assert_eq!(rules[&ReplacementRule::new("foo")], 1_334_318_401);
    assert_eq!(rules[&ReplacementRule::new("bar")], 1_334_318_402);
    assert_eq!(rules[&ReplacementRule::new("zap")], 1_334_318_402);
}

fn rule_names(store: &RuleStore, project: ProjectId) -> HashSet<String> {
    store
        .get_rules(project)
        .unwrap()
        .keys()
        .map(|rule| rule.to_string())
        .collect()
}

fn set_of(rules: &[&str]) -> HashSet<String> {
    rules.iter().map(|rule| rule.to_string()).collect()
}

/// Counts batches while running them inline
struct CountingDispatcher {
    inner: InlineDispatcher,
    calls: AtomicUsize,
}

impl TaskDispatcher for CountingDispatcher {
    fn dispatch(&self, batch: Vec<ProjectId>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(batch)
    }
}

#[test]
fn test_run_clusterer_task() {
    let clock = clock();
    let samples = Arc::new(MemorySampleSet::new(1000, DAY, clock.clone()));
    let rule_store = RuleStore::in_memory();
    let worker = Arc::new(ClusterWorker::new(
        samples.clone(),
        rule_store.clone(),
        5,
        clock.clone(),
    ));
    let dispatcher = Arc::new(CountingDispatcher {
        inner: InlineDispatcher::new(worker),
        calls: AtomicUsize::new(0),
    });
    let config = ClustererConfig {
        enabled: true,
        ..ClustererConfig::default()
    };
    let mut scheduler = ClusterScheduler::new(samples.clone(), dispatcher.clone(), config);

    let project1 = Project::new(123, 1, "project1");
    let project2 = Project::new(223, 1, "project2");
    for project in [&project1, &project2] {
        for i in 0..project.name.len() {
            samples
                .add(project.id, &format!("/user/tx-{}-{}", project.name, i))
                .unwrap();
            samples
                .add(project.id, &format!("/org/tx-{}-{}", project.name, i))
                .unwrap();
        }
    }

    assert_eq!(scheduler.spawn_clusterers().unwrap(), 1);
    assert_eq!(dispatcher.calls.swap(0, Ordering::SeqCst), 1);

    let expected = set_of(&["/org/*/**", "/user/*/**"]);
    assert_eq!(rule_names(&rule_store, project1.id), expected);
    assert_eq!(rule_names(&rule_store, project2.id), expected);

    for i in 0..6 {
        samples
            .add(project1.id, &format!("/users/trans/tx-{}-{}", project1.id, i))
            .unwrap();
        samples
            .add(project1.id, &format!("/test/path/{}", i))
            .unwrap();
    }

    clock.advance(chrono::Duration::seconds(60));
    scheduler.set_projects_per_task(1);
    assert_eq!(scheduler.spawn_clusterers().unwrap(), 2);
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);

    assert_eq!(
        rule_names(&rule_store, project1.id),
        set_of(&["/org/*/**", "/user/*/**", "/test/path/*/**", "/users/trans/*/**"])
    );

    let rules = rule_store.get_rules(project1.id).unwrap();
    assert_eq!(
        rules[&ReplacementRule::new("/user/*/**")],
        1_334_318_401 + 60
    );
}

#[test]
fn test_disabled_scheduler_does_nothing() {
    let samples = Arc::new(MemorySampleSet::new(10, DAY, clock()));
    samples.add(ProjectId(1), "/a/b").unwrap();
    let worker = Arc::new(ClusterWorker::new(
        samples.clone(),
        RuleStore::in_memory(),
        1,
        clock(),
    ));
    let scheduler = ClusterScheduler::new(
        samples,
        Arc::new(InlineDispatcher::new(worker)),
        ClustererConfig::default(),
    );

    assert_eq!(scheduler.spawn_clusterers().unwrap(), 0);
}

#[test]
fn test_worker_skips_failing_projects() {
    let worker = ClusterWorker::new(Arc::new(BrokenSampleSet), RuleStore::in_memory(), 2, clock());
    assert_eq!(worker.cluster_projects(&[ProjectId(1), ProjectId(2)]), 0);
}

#[tokio::test]
async fn test_channel_dispatcher_feeds_worker_loop() {
    let clock = clock();
    let samples = Arc::new(MemorySampleSet::new(100, DAY, clock.clone()));
    let rule_store = RuleStore::in_memory();
    for project in [1, 2, 3] {
        for i in 0..3 {
            samples
                .add(ProjectId(project), &format!("/api/items/{}", i))
                .unwrap();
        }
    }

    let worker = Arc::new(ClusterWorker::new(
        samples.clone(),
        rule_store.clone(),
        3,
        clock,
    ));
    let (dispatcher, receiver) = ChannelDispatcher::new(16);
    let handle = tokio::spawn(worker.run(receiver));

    let config = ClustererConfig {
        enabled: true,
        projects_per_task: 2,
        ..ClustererConfig::default()
    };
    let scheduler = ClusterScheduler::new(samples, Arc::new(dispatcher), config);
    assert_eq!(scheduler.spawn_clusterers().unwrap(), 2);

    // closing the queue stops the worker
    drop(scheduler);
    assert_eq!(handle.await.unwrap(), 2);

    for project in [1, 2, 3] {
        assert_eq!(
            rule_names(&rule_store, ProjectId(project)),
            set_of(&["/api/items/*/**"])
        );
    }
}

#[test]
fn test_closed_channel_drops_batches() {
    let (dispatcher, receiver) = ChannelDispatcher::new(4);
    drop(receiver);

    let result = dispatcher.dispatch(vec![ProjectId(1)]);
    assert!(matches!(result, Err(ClustererError::Dispatch(_))));
}

#[test]
fn test_worker_loop_without_batches() {
    let worker = Arc::new(ClusterWorker::new(
        Arc::new(MemorySampleSet::new(10, DAY, clock())),
        RuleStore::in_memory(),
        2,
        clock(),
    ));
    let (dispatcher, receiver) = ChannelDispatcher::new(1);
    drop(dispatcher);

    let handled = tokio_test::block_on(worker.run(receiver));
    assert_eq!(handled, 0);
}

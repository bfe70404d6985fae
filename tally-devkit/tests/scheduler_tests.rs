//! Scheduler behavior: immediate first tick, periodic reruns, failure
//! isolation, on-demand triggers, and cooperative shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tally_devkit::{CapturingPublisher, FailingCollector, HangingCollector, MemoryStore, ScriptedCollector};
use tally_kernel::collector::{CollectResult, Registry};
use tally_kernel::models::{Asset, CollectorConfig};
use tally_kernel::reconciler::Reconciler;
use tally_kernel::scheduler::Scheduler;
use tokio_util::sync::CancellationToken;

const GRACE: Duration = Duration::from_secs(24 * 3600);

fn pipeline(registry: Arc<Registry>, root: &CancellationToken) -> Scheduler {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(CapturingPublisher::new());
    let reconciler = Arc::new(Reconciler::new(store, None, Some(publisher), GRACE));
    Scheduler::new(registry, reconciler, root)
}

fn config(name: &str, collector_type: &str, interval: Duration) -> CollectorConfig {
    let mut cfg = CollectorConfig::new(name, collector_type);
    cfg.interval = interval;
    cfg
}

/// Poll until the counter reaches `want` or the deadline passes.
async fn wait_for_runs(counter: &Arc<AtomicUsize>, want: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < want {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {want} runs"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn snapshot() -> CollectResult {
    let mut asset = Asset::new("10.0.0.5", "nmap", "host", "web01");
    asset.ip_addresses = vec!["10.0.0.5".into()];
    CollectResult { assets: vec![asset], relationships: Vec::new() }
}

#[tokio::test]
async fn first_collection_runs_immediately() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(ScriptedCollector::new("nmap", snapshot()));
    let runs = collector.run_counter();
    registry.register(collector, config("lan", "nmap", Duration::from_secs(3600)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry.clone(), &root);
    scheduler.start();

    wait_for_runs(&runs, 1).await;
    scheduler.stop().await;

    let status = &registry.list()[0];
    assert_eq!(status.asset_count, 1);
    assert!(status.last_success.is_some());
    assert!(status.last_error.is_none());
    assert!(!status.running);
}

#[tokio::test]
async fn worker_reruns_on_the_configured_interval() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(ScriptedCollector::new("nmap", CollectResult::default()));
    let runs = collector.run_counter();
    registry.register(collector, config("lan", "nmap", Duration::from_millis(30)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry, &root);
    scheduler.start();

    wait_for_runs(&runs, 3).await;
    scheduler.stop().await;
}

#[tokio::test]
async fn collect_errors_do_not_kill_the_worker() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(FailingCollector::new("zabbix"));
    let runs = collector.run_counter();
    registry.register(collector, config("monitoring", "zabbix", Duration::from_millis(30)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry.clone(), &root);
    scheduler.start();

    // The worker keeps ticking after failures.
    wait_for_runs(&runs, 2).await;
    scheduler.stop().await;

    let status = &registry.list()[0];
    assert!(status.last_error.as_deref().unwrap().contains("scripted failure"));
    assert!(status.last_success.is_none());
}

#[tokio::test]
async fn disabled_collectors_are_not_scheduled() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(ScriptedCollector::new("nmap", CollectResult::default()));
    let runs = collector.run_counter();
    let mut cfg = config("lan", "nmap", Duration::from_millis(20));
    cfg.enabled = false;
    registry.register(collector, cfg);

    let root = CancellationToken::new();
    let scheduler = pipeline(registry, &root);
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_now_triggers_an_extra_run() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(ScriptedCollector::new("nmap", CollectResult::default()));
    let runs = collector.run_counter();
    registry.register(collector, config("lan", "nmap", Duration::from_secs(3600)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry, &root);
    scheduler.start();
    wait_for_runs(&runs, 1).await;

    scheduler.run_now("lan").unwrap();
    wait_for_runs(&runs, 2).await;

    assert!(scheduler.run_now("ghost").is_err());
    scheduler.stop().await;
}

#[tokio::test]
async fn stop_cancels_an_inflight_collect_and_joins() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(HangingCollector::new("vmware"));
    let started = collector.start_counter();
    registry.register(collector, config("vcenter", "vmware", Duration::from_secs(3600)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry.clone(), &root);
    scheduler.start();

    // The collect is in flight and would hang for an hour on its own.
    wait_for_runs(&started, 1).await;

    // Cancellation must reach the collector; stop returns only after the
    // worker has exited, and promptly.
    tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
        .await
        .expect("stop() joined the hanging worker in time");

    let status = &registry.list()[0];
    assert!(status.last_error.as_deref().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn cancelling_the_root_token_stops_workers() {
    let registry = Arc::new(Registry::new());
    let collector = Arc::new(HangingCollector::new("vmware"));
    let started = collector.start_counter();
    registry.register(collector, config("vcenter", "vmware", Duration::from_secs(3600)));

    let root = CancellationToken::new();
    let scheduler = pipeline(registry, &root);
    scheduler.start();
    wait_for_runs(&started, 1).await;

    root.cancel();
    tokio::time::timeout(Duration::from_secs(5), scheduler.stop())
        .await
        .expect("root cancellation propagated to the worker");
}

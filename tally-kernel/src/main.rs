//! Service entry point: config, stores, bus, collectors, scheduler,
//! notifier, HTTP. Only a failed canonical-store connect is fatal; every
//! other subsystem degrades with a warning.

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_kernel::bus::{EventBus, EventPublisher};
use tally_kernel::collector::Registry;
use tally_kernel::collectors;
use tally_kernel::config::load_config;
use tally_kernel::http::{build_router, AppState};
use tally_kernel::notifier::{spawn_event_listener, Notifier};
use tally_kernel::reconciler::Reconciler;
use tally_kernel::scheduler::Scheduler;
use tally_kernel::store::{CanonicalStore, GraphStore, PgGraph, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging first so config loading can complain.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = load_config().await;

    // Canonical store: the one fatal dependency.
    let store: Arc<dyn CanonicalStore> = Arc::new(
        PgStore::connect(&cfg.database.dsn())
            .await
            .context("connecting to canonical store")?,
    );
    info!("connected to canonical store");

    // Graph projection: optional, the API answers 503 without it.
    let graph: Option<Arc<dyn GraphStore>> = if cfg.graph.enabled {
        match PgGraph::connect(&cfg.graph.dsn_or(&cfg.database)).await {
            Ok(g) => {
                info!("connected to graph store");
                Some(Arc::new(g))
            }
            Err(e) => {
                warn!(error = %e, "graph store unavailable, graph features disabled");
                None
            }
        }
    } else {
        info!("graph store disabled by config");
        None
    };

    // Event bus: the client queues while the broker is unreachable.
    let bus = Arc::new(EventBus::connect(&cfg.mqtt));

    // Notifier: durable rules plus the configured webhook endpoint.
    let mut notifier = Notifier::new(cfg.notifier.webhook_url.clone());
    match store.list_alert_rules().await {
        Ok(rules) => {
            for rule in rules {
                notifier.add_rule(rule);
            }
        }
        Err(e) => warn!(error = %e, "failed to load alert rules"),
    }
    info!(rules = notifier.rule_count(), "notifier configured");
    if let Some(events) = bus.subscribe_events().await {
        spawn_event_listener(events, Arc::new(notifier));
    }

    // Collector registry from config entries.
    let registry = Arc::new(Registry::new());
    for entry in &cfg.collectors {
        let Some(collector) = collectors::build(&entry.collector_type) else {
            warn!(name = %entry.name, collector_type = %entry.collector_type,
                "unknown collector type, skipping");
            continue;
        };
        registry.register(collector, entry.resolve());
    }

    let publisher: Arc<dyn EventPublisher> = bus.clone();
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        graph.clone(),
        Some(publisher),
        cfg.reconciler.grace(),
    ));

    let root = CancellationToken::new();
    let scheduler = if cfg.scheduler.enabled {
        let scheduler = Arc::new(Scheduler::new(registry.clone(), reconciler, &root));
        scheduler.start();
        Some(scheduler)
    } else {
        info!("scheduler disabled by config");
        None
    };

    // HTTP API.
    let state = AppState {
        store,
        graph,
        registry,
        scheduler: scheduler.clone(),
    };
    let app = build_router(state);

    let addr = cfg.server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %addr, "listening");

    let shutdown_root = root.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to install shutdown signal handler");
            }
            shutdown_root.cancel();
        })
        .await
        .context("http server")?;

    info!("shutting down");
    root.cancel();
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    info!("stopped");
    Ok(())
}

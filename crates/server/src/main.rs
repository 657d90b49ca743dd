//! fanout pipeline entry point.

use std::sync::Arc;

use fanout_common::{Config, IdGenerator, Metrics};
use fanout_core::{
    ContentService, DistributionService, EventPublisherService, ParserService,
    PushRendererService, TaskQueue,
};
use fanout_db::repositories::{ContentRepository, TaskRepository};
use fanout_queue::workers::{DistributeContext, ParseContext, WorkerContext, run_worker};
use fanout_queue::{
    HttpParser, HttpPushRenderer, PipelineExecutor, RedisPubSub, RetryConfig, SchedulerConfig,
    run_scheduler,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fanout=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;
    init_tracing(&config);

    info!("Starting fanout...");

    // Connect to database
    let db = Arc::new(fanout_db::init(&config).await?);
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    fanout_db::migrate(&db).await?;
    info!("Migrations completed");

    // Optional observer over Redis Pub/Sub
    let event_publisher: Option<EventPublisherService> = match &config.redis {
        Some(redis) => match RedisPubSub::new(&redis.url, &redis.prefix).await {
            Ok(pubsub) => Some(Arc::new(pubsub)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, running without event publishing");
                None
            }
        },
        None => None,
    };

    // External collaborators
    let parser: ParserService = Arc::new(HttpParser::new(&config.collaborators)?);
    let renderer: PushRendererService = Arc::new(HttpPushRenderer::new(&config.collaborators)?);

    // Initialize services
    let metrics = Arc::new(Metrics::new());
    let id_gen = IdGenerator::new();
    let task_queue = TaskQueue::new(
        TaskRepository::new(db.clone()),
        id_gen.generate_worker_id("scheduler"),
        config.worker.poll_interval(),
        metrics.clone(),
    );

    let mut distribution = DistributionService::new(db.clone(), &config.distribution);
    if let Some(publisher) = &event_publisher {
        distribution.set_event_publisher(publisher.clone());
    }

    let mut content_service = ContentService::new(
        ContentRepository::new(db.clone()),
        distribution,
        task_queue.clone(),
        &config.worker,
    );
    if let Some(publisher) = &event_publisher {
        content_service.set_event_publisher(publisher.clone());
    }

    let retry = RetryConfig::from_worker_config(&config.worker, config.worker.parse_max_attempts);
    let mut distribute = DistributeContext::new(db.clone(), renderer, retry.clone(), metrics.clone());
    if let Some(publisher) = &event_publisher {
        distribute.set_event_publisher(publisher.clone());
    }

    let parse = ParseContext {
        content_service: content_service.clone(),
        parser,
        retry,
        metrics: metrics.clone(),
    };

    let shutdown = CancellationToken::new();

    // Spawn worker loops
    let mut handles = Vec::with_capacity(config.worker.concurrency + 2);
    for _ in 0..config.worker.concurrency {
        let ctx = WorkerContext {
            task_queue: task_queue.for_worker(id_gen.generate_worker_id("worker")),
            parse: parse.clone(),
            distribute: distribute.clone(),
            poll_timeout: config.worker.poll_timeout(),
        };
        handles.push(tokio::spawn(run_worker(ctx, shutdown.clone())));
    }
    info!(concurrency = config.worker.concurrency, "Workers started");

    // Spawn periodic ticks
    let executor = Arc::new(PipelineExecutor::new(
        task_queue,
        content_service,
        distribute,
    ));
    handles.extend(run_scheduler(
        SchedulerConfig::from_config(&config.worker, &config.distribution),
        executor,
        shutdown.clone(),
    ));
    info!("Scheduler started");

    shutdown_signal().await;
    shutdown.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task panicked");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

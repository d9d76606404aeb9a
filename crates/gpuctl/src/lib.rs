//! GPU instance orchestration control plane.
//!
//! Boot order follows spec §9's DESIGN NOTES: cache manager, Redis-backed
//! job queue (with recovery), instance service, workers, migration
//! scheduler, then Startup Sync.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use gpuctl_cache::{BackendKind, CacheManager};
use gpuctl_config::AppConfig;
use gpuctl_health::HealthChecker;
use gpuctl_instance::{InstanceService, InstanceServiceConfig};
use gpuctl_migration::{MigrationScheduler, MigrationSchedulerConfig, StartupSync, SyncReport};
use gpuctl_queue::{JobQueue, MemoryQueueStore, QueueConfig, QueueStore, RedisQueueStore};
use gpuctl_resolver::{ProductResolver, TemplateResolver};
use gpuctl_upstream::{HttpUpstreamClient, SharedUpstreamClient};
use gpuctl_webhook::{HttpWebhookClient, WebhookClient};
use gpuctl_workers::{register_all, MonitorConfig, WorkerDeps};
use tracing::info;

pub mod error;
pub use error::{BootError, Result};

/// Every long-lived collaborator the `serve`/`sync` subcommands need, wired
/// up per the boot order but not yet started (no workers registered, no
/// scheduler spawned) so callers can choose what to run.
pub struct ControlPlane {
    pub instance_service: Arc<InstanceService>,
    pub queue: Arc<JobQueue>,
    pub upstream: SharedUpstreamClient,
    pub migration_scheduler: Arc<MigrationScheduler>,
    pub startup_sync: StartupSync,
}

async fn queue_store(config: &AppConfig) -> Result<Arc<dyn QueueStore>> {
    if let Some(url) = &config.redis.url {
        match RedisQueueStore::connect(url).await {
            Ok(store) => return Ok(Arc::new(store)),
            Err(err) if config.redis.enable_fallback => {
                tracing::warn!(%err, "redis queue store unavailable, falling back to in-memory");
            }
            Err(err) => return Err(BootError::Queue(err)),
        }
    }
    Ok(Arc::new(MemoryQueueStore::new()))
}

/// Assembles every collaborator per spec §9's boot order: cache manager,
/// Redis client, job queue (with recovery), instance service, migration
/// scheduler. Startup Sync is returned unstarted; callers invoke `run()`
/// explicitly (once at `serve` boot, or on demand via `gpuctl sync`).
pub async fn bootstrap(config: &AppConfig) -> Result<ControlPlane> {
    let cache_manager = CacheManager::new(config.redis.url.clone(), 10_000);
    let backend = if config.redis.is_configured() { BackendKind::Fallback } else { BackendKind::Memory };
    let product_cache = cache_manager.get_cache("products", backend).await?;
    let template_cache = cache_manager.get_cache("templates", backend).await?;
    let instance_cache = cache_manager.get_cache("instances", backend).await?;

    let upstream: SharedUpstreamClient = Arc::new(HttpUpstreamClient::new(
        config.upstream.base_url.clone(),
        config.upstream.api_key.clone(),
        config.upstream.request_timeout(),
    )?);

    let store = queue_store(config).await?;
    let queue = Arc::new(JobQueue::new(store, QueueConfig::default()));
    queue.perform_recovery_tasks().await?;

    let products = Arc::new(ProductResolver::new(upstream.clone(), product_cache));
    let templates = Arc::new(TemplateResolver::new(upstream.clone(), template_cache));
    let instance_service = Arc::new(InstanceService::new(
        upstream.clone(),
        products,
        templates,
        instance_cache,
        queue.clone(),
        InstanceServiceConfig {
            default_region: config.upstream.default_region.clone(),
            startup_default_max_wait_ms: config.startup.default_max_wait_ms,
            ..InstanceServiceConfig::default()
        },
    ));

    let health_checker = Arc::new(HealthChecker::new());
    let webhook_client: Arc<dyn WebhookClient> =
        Arc::new(HttpWebhookClient::new(Duration::from_secs(10)));

    register_all(
        &queue,
        WorkerDeps {
            instance_service: instance_service.clone(),
            upstream: upstream.clone(),
            health_checker,
            webhook_client,
            monitor_config: MonitorConfig::default(),
        },
    )
    .await;

    let migration_scheduler = Arc::new(MigrationScheduler::new(
        queue.clone(),
        MigrationSchedulerConfig {
            tick_interval: Duration::from_millis(config.migration.schedule_interval_ms),
            dry_run: config.migration.dry_run,
        },
    ));

    let startup_sync = StartupSync::new(instance_service.clone(), upstream.clone());

    Ok(ControlPlane { instance_service, queue, upstream, migration_scheduler, startup_sync })
}

/// `gpuctl serve`: boots every collaborator, starts the worker pool and the
/// migration scheduler, runs Startup Sync once, then blocks forever.
pub async fn run_server(config: &AppConfig) -> Result<()> {
    let plane = bootstrap(config).await?;

    plane.queue.start_processing();
    if config.migration.enabled {
        plane.migration_scheduler.start();
    }

    let report = run_startup_sync(&plane).await?;
    info!(adopted = report.adopted, removed = report.removed, "startup sync complete");

    std::future::pending::<()>().await;
    Ok(())
}

/// `gpuctl sync`: runs Startup Sync once, against a freshly booted (but not
/// started) control plane, for operator-triggered reconciliation outside
/// the normal boot path.
pub async fn run_startup_sync(plane: &ControlPlane) -> Result<SyncReport> {
    plane.startup_sync.run().await.map_err(BootError::Sync)
}

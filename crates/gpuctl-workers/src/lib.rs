//! Job handlers (C7, spec §4.7): the six `JobHandler` implementations
//! registered against a [`JobQueue`] (C6). Each handler destructures its own
//! [`JobPayload`] variant and reports a pass/fail outcome; attempt counting,
//! retry scheduling, and terminal-state transitions all live in the queue
//! itself (`gpuctl-queue`), not here.
//!
//! Grounded on `claw-worker`'s handler-per-job-type registration pattern,
//! narrowed to this system's six job types.

#![forbid(unsafe_code)]

mod auto_stop_check;
mod create_instance;
mod migrate;
mod monitor_instance;
mod monitor_startup;
mod send_webhook;
mod shared;

pub use auto_stop_check::AutoStopCheckHandler;
pub use create_instance::CreateInstanceHandler;
pub use migrate::{MigrateSpotInstancesHandler, MigrationBatchResult};
pub use monitor_instance::MonitorInstanceHandler;
pub use monitor_startup::MonitorStartupHandler;
pub use send_webhook::SendWebhookHandler;
pub use shared::MonitorConfig;

use std::sync::Arc;

use gpuctl_health::HealthChecker;
use gpuctl_instance::InstanceService;
use gpuctl_proto::JobType;
use gpuctl_queue::JobQueue;
use gpuctl_upstream::SharedUpstreamClient;
use gpuctl_webhook::WebhookClient;

/// Collaborators every handler needs, bundled so callers wire the queue
/// once at boot (spec §9 startup order) instead of repeating five
/// constructor calls.
pub struct WorkerDeps {
    pub instance_service: Arc<InstanceService>,
    pub upstream: SharedUpstreamClient,
    pub health_checker: Arc<HealthChecker>,
    pub webhook_client: Arc<dyn WebhookClient>,
    pub monitor_config: MonitorConfig,
}

/// Registers all six job handlers against `queue`.
pub async fn register_all(queue: &Arc<JobQueue>, deps: WorkerDeps) {
    queue
        .register_handler(JobType::CreateInstance, Arc::new(CreateInstanceHandler::new(deps.instance_service.clone())))
        .await;
    queue
        .register_handler(
            JobType::MonitorInstance,
            Arc::new(MonitorInstanceHandler::new(
                deps.instance_service.clone(),
                deps.upstream.clone(),
                deps.health_checker.clone(),
                queue.clone(),
                deps.monitor_config,
            )),
        )
        .await;
    queue
        .register_handler(
            JobType::MonitorStartup,
            Arc::new(MonitorStartupHandler::new(
                deps.instance_service.clone(),
                deps.upstream.clone(),
                deps.health_checker.clone(),
                queue.clone(),
                deps.monitor_config,
            )),
        )
        .await;
    queue.register_handler(JobType::SendWebhook, Arc::new(SendWebhookHandler::new(deps.webhook_client.clone()))).await;
    queue
        .register_handler(JobType::MigrateSpotInstances, Arc::new(MigrateSpotInstancesHandler::new(deps.upstream.clone())))
        .await;
    queue.register_handler(JobType::AutoStopCheck, Arc::new(AutoStopCheckHandler::new(deps.instance_service.clone()))).await;
}

//! Instance state owned exclusively by the instance service (C8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::health::HealthCheckState;

/// Status graph (spec §4.1):
///
/// ```text
/// creating → created → starting → running → health_checking → ready
///                                         ↘ failed
/// ready → stopping → stopped → exited → (may re-enter) starting
/// any non-terminal → failed  (terminal, manual cleanup only)
/// any → terminated  (external deletion)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Creating,
    Created,
    Starting,
    Running,
    HealthChecking,
    Ready,
    Stopping,
    Stopped,
    Exited,
    Failed,
    Terminated,
}

impl InstanceStatus {
    /// Whether no further automatic transition is expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }

    /// Whether `next` is a legal transition from `self` per the status graph.
    /// `failed` and `terminated` are reachable from any non-terminal status,
    /// and `ready -> ready` is the one permitted idempotent self-edge.
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Failed {
            return !self.is_terminal();
        }
        if next == Self::Terminated {
            return true;
        }
        match (self, next) {
            (Self::Creating, Self::Created) => true,
            (Self::Creating, Self::Starting) => true,
            (Self::Created, Self::Starting) => true,
            (Self::Starting, Self::Running) => true,
            (Self::Running, Self::HealthChecking) => true,
            (Self::HealthChecking, Self::HealthChecking) => true,
            (Self::HealthChecking, Self::Ready) => true,
            (Self::Running, Self::Ready) => true,
            (Self::Ready, Self::Ready) => true,
            (Self::Ready, Self::Stopping) => true,
            (Self::Stopping, Self::Stopped) => true,
            (Self::Stopped, Self::Exited) => true,
            (Self::Exited, Self::Starting) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::HealthChecking => "health_checking",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub port: u16,
    pub endpoint: String,
    #[serde(rename = "type")]
    pub kind: PortKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Http,
    Https,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfiguration {
    pub gpu_num: u8,
    pub rootfs_size: u32,
    pub region: String,
    pub image_url: String,
    pub image_auth: Option<String>,
    pub ports: Vec<PortMapping>,
    pub envs: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceTimestamps {
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ready: Option<DateTime<Utc>>,
    pub failed: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub novita_id: Option<String>,
    pub name: String,
    pub status: InstanceStatus,
    pub product_id: String,
    pub template_id: String,
    pub configuration: InstanceConfiguration,
    pub timestamps: InstanceTimestamps,
    pub health_check: Option<HealthCheckState>,
    pub webhook_url: Option<String>,
    pub last_error: Option<String>,
}

impl Instance {
    /// Mints a new local instance id, e.g. `inst_01J...` (ULID, lowercased).
    ///
    /// Callers that need the `inst_\d+_[a-z0-9]+` legacy shape described in
    /// spec.md's literal scenario 1 should use [`new_legacy_id`] instead; both
    /// forms satisfy the invariant that ids are unique and locally assigned.
    pub fn new_id() -> String {
        format!("inst_{}", Ulid::new().to_string().to_lowercase())
    }
}

/// Generates an id matching the historical `inst_<epoch_ms>_<rand>` shape,
/// kept because scenario 1 (spec §8) pattern-matches on it explicitly.
pub fn new_legacy_id(now_ms: u64) -> String {
    let suffix: String = Ulid::new().to_string().to_lowercase().chars().take(9).collect();
    format!("inst_{now_ms}_{suffix}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub product_name: String,
    pub template_id: String,
    pub gpu_num: u8,
    pub rootfs_size: u32,
    pub region: Option<String>,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInstanceResult {
    pub instance_id: String,
    pub novita_instance_id: String,
    pub status: InstanceStatus,
    pub estimated_ready_time: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceLookup {
    Id,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupOperationStatus {
    Initiated,
    Monitoring,
    HealthChecking,
    Completed,
    Failed,
}

impl StartupOperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupOperationPhases {
    pub start_requested: Option<DateTime<Utc>>,
    pub instance_starting: Option<DateTime<Utc>>,
    pub health_checking: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupOperation {
    pub operation_id: String,
    pub instance_id: String,
    pub novita_instance_id: String,
    pub status: StartupOperationStatus,
    pub started_at: DateTime<Utc>,
    pub phases: StartupOperationPhases,
    pub error: Option<String>,
}

impl StartupOperation {
    pub fn new(instance_id: String, novita_instance_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            operation_id: format!("op_{}", Ulid::new().to_string().to_lowercase()),
            instance_id,
            novita_instance_id,
            status: StartupOperationStatus::Initiated,
            started_at,
            phases: StartupOperationPhases {
                start_requested: Some(started_at),
                ..Default::default()
            },
            error: None,
        }
    }
}

//! Shared data model and error taxonomy for the GPU instance control plane.
//!
//! Every mutable record here is owned exclusively by one component (the
//! instance service owns `Instance`, the job queue owns `Job`, and so on);
//! this crate only carries the shapes, not the state.

#![forbid(unsafe_code)]

pub mod error;
pub mod health;
pub mod instance;
pub mod job;
pub mod product;
pub mod validation;
pub mod webhook;

pub use error::ControlPlaneError;
pub use health::{
    EndpointCheckResult, EndpointStatus, ErrorSeverity, HealthCheckConfig, HealthCheckErrorKind,
    HealthCheckResult, HealthCheckState, HealthCheckStatus, OverallHealthStatus,
};
pub use instance::{
    CreateInstanceRequest, CreateInstanceResult, EnvVar, Instance, InstanceConfiguration,
    InstanceLookup, InstanceStatus, InstanceTimestamps, PortKind, PortMapping, StartupOperation,
    StartupOperationPhases, StartupOperationStatus,
};
pub use job::{Job, JobFilter, JobPayload, JobPriority, JobStatus, JobType, QueueStats, DEFAULT_MAX_ATTEMPTS};
pub use product::{
    Availability, OptimalProductResult, Product, ProductFilters, TemplateConfiguration,
    DEFAULT_REGION_PRIORITY,
};
pub use webhook::{WebhookPayload, WebhookStatus};

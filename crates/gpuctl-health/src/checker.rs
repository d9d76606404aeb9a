use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use gpuctl_proto::{EndpointCheckResult, EndpointStatus, HealthCheckConfig, HealthCheckResult, PortMapping};
use rand::Rng;
use tracing::{debug, warn};

use crate::probe::{EndpointProber, HttpProber, ProbeOutcome};

/// Endpoint health prober (C5, spec §4.5). Owns nothing but an
/// `EndpointProber`, swappable in tests.
pub struct HealthChecker {
    prober: Arc<dyn EndpointProber>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self { prober: Arc::new(HttpProber::new()) }
    }

    pub fn with_prober(prober: Arc<dyn EndpointProber>) -> Self {
        Self { prober }
    }

    /// Step 1: empty mappings -> unhealthy with no endpoints. Step 2: an
    /// explicit `targetPort` filters to the single matching mapping, and an
    /// unmatched target port also yields an empty, unhealthy result. Step 3:
    /// every remaining endpoint is probed concurrently, retried with
    /// jittered backoff on retryable error kinds. Step 4: results aggregate
    /// via the healthy/unhealthy/partial rule.
    pub async fn perform_health_checks(
        &self,
        port_mappings: &[PortMapping],
        config: HealthCheckConfig,
    ) -> HealthCheckResult {
        let targets: Vec<&PortMapping> = match config.target_port {
            Some(target) => port_mappings.iter().filter(|m| m.port == target).collect(),
            None => port_mappings.iter().collect(),
        };

        if targets.is_empty() {
            debug!("no endpoints to health check");
            return HealthCheckResult::aggregate(vec![], Utc::now());
        }

        let checks = targets.into_iter().map(|mapping| self.check_one(mapping, config));
        let endpoints: Vec<EndpointCheckResult> = join_all(checks).await;
        HealthCheckResult::aggregate(endpoints, Utc::now())
    }

    async fn check_one(&self, mapping: &PortMapping, config: HealthCheckConfig) -> EndpointCheckResult {
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut last_outcome: Option<ProbeOutcome> = None;

        for attempt in 1..=config.retry_attempts.max(1) {
            let outcome = self.prober.probe(&mapping.endpoint, timeout).await;
            let retryable = outcome.error.map(|e| e.is_retryable()).unwrap_or(false);
            let is_last = attempt == config.retry_attempts.max(1);

            if outcome.success || !retryable || is_last {
                last_outcome = Some(outcome);
                break;
            }

            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            let delay_ms = (config.retry_delay_ms as f64 * jitter) as u64;
            warn!(endpoint = %mapping.endpoint, attempt, delay_ms, "health probe failed, retrying");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            last_outcome = Some(outcome);
        }

        let outcome = last_outcome.expect("at least one probe attempt always runs");
        EndpointCheckResult {
            port: mapping.port,
            endpoint: mapping.endpoint.clone(),
            kind: mapping.kind,
            status: if outcome.success { EndpointStatus::Healthy } else { EndpointStatus::Unhealthy },
            response_time_ms: outcome.response_time_ms,
            last_checked: Utc::now(),
            error: outcome.error,
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gpuctl_proto::{HealthCheckErrorKind, OverallHealthStatus, PortKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct ScriptedProber {
        outcomes: Mutex<Vec<ProbeOutcome>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EndpointProber for ScriptedProber {
        async fn probe(&self, _endpoint: &str, _timeout: Duration) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::Timeout) }
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn mapping(port: u16) -> PortMapping {
        PortMapping { port, endpoint: format!("http://localhost:{port}"), kind: PortKind::Http }
    }

    fn config(retry_attempts: u32) -> HealthCheckConfig {
        HealthCheckConfig { retry_delay_ms: 1, retry_attempts, ..HealthCheckConfig::default() }
    }

    #[tokio::test]
    async fn empty_port_mappings_yields_unhealthy_with_no_endpoints() {
        let checker = HealthChecker::with_prober(Arc::new(ScriptedProber {
            outcomes: Mutex::new(vec![]),
            calls: AtomicU32::new(0),
        }));
        let result = checker.perform_health_checks(&[], config(3)).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Unhealthy);
        assert!(result.endpoints.is_empty());
    }

    #[tokio::test]
    async fn unmatched_target_port_yields_empty_unhealthy_result() {
        let checker = HealthChecker::with_prober(Arc::new(ScriptedProber {
            outcomes: Mutex::new(vec![ProbeOutcome { success: true, response_time_ms: 10, error: None }]),
            calls: AtomicU32::new(0),
        }));
        let mut cfg = config(3);
        cfg.target_port = Some(9999);
        let result = checker.perform_health_checks(&[mapping(8080)], cfg).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Unhealthy);
        assert!(result.endpoints.is_empty());
    }

    #[tokio::test]
    async fn progressive_recovery_succeeds_on_a_later_retry() {
        let prober = Arc::new(ScriptedProber {
            outcomes: Mutex::new(vec![
                ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::ServiceUnavailable) },
                ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::ServiceUnavailable) },
                ProbeOutcome { success: true, response_time_ms: 42, error: None },
            ]),
            calls: AtomicU32::new(0),
        });
        let checker = HealthChecker::with_prober(prober.clone());
        let result = checker.perform_health_checks(&[mapping(8080)], config(3)).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Healthy);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let prober = Arc::new(ScriptedProber {
            outcomes: Mutex::new(vec![
                ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::ClientError) },
                ProbeOutcome { success: true, response_time_ms: 10, error: None },
            ]),
            calls: AtomicU32::new(0),
        });
        let checker = HealthChecker::with_prober(prober.clone());
        let result = checker.perform_health_checks(&[mapping(8080)], config(3)).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Unhealthy);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_on_retryable_error_yields_unhealthy() {
        let prober = Arc::new(ScriptedProber { outcomes: Mutex::new(vec![]), calls: AtomicU32::new(0) });
        let checker = HealthChecker::with_prober(prober.clone());
        let result = checker.perform_health_checks(&[mapping(8080)], config(3)).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Unhealthy);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn multiple_endpoints_check_concurrently_and_aggregate_partial() {
        struct PerPortProber;
        #[async_trait]
        impl EndpointProber for PerPortProber {
            async fn probe(&self, endpoint: &str, _timeout: Duration) -> ProbeOutcome {
                if endpoint.ends_with("8080") {
                    ProbeOutcome { success: true, response_time_ms: 5, error: None }
                } else {
                    ProbeOutcome { success: false, response_time_ms: 0, error: Some(HealthCheckErrorKind::ClientError) }
                }
            }
        }
        let checker = HealthChecker::with_prober(Arc::new(PerPortProber));
        let result = checker.perform_health_checks(&[mapping(8080), mapping(8081)], config(1)).await;
        assert_eq!(result.overall_status, OverallHealthStatus::Partial);
        assert_eq!(result.endpoints.len(), 2);
    }
}

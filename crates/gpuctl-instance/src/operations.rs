use std::collections::HashMap;

use gpuctl_proto::StartupOperation;
use tokio::sync::RwLock;

/// Tracks the one non-terminal Startup Operation allowed per instance
/// (Invariant 2). A second `startInstance` call for the same instance while
/// an entry is present here fails fast with `StartupOperationInProgress`.
#[derive(Default)]
pub struct StartupOperationTracker {
    by_instance: RwLock<HashMap<String, StartupOperation>>,
}

impl StartupOperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active_for(&self, instance_id: &str) -> Option<StartupOperation> {
        self.by_instance.read().await.get(instance_id).cloned()
    }

    /// Returns `false` without inserting if an operation is already active.
    pub async fn start(&self, operation: StartupOperation) -> bool {
        let mut by_instance = self.by_instance.write().await;
        if by_instance.contains_key(&operation.instance_id) {
            return false;
        }
        by_instance.insert(operation.instance_id.clone(), operation);
        true
    }

    pub async fn update(&self, operation: StartupOperation) {
        self.by_instance.write().await.insert(operation.instance_id.clone(), operation);
    }

    /// Removes the tracked operation once it reaches a terminal status.
    pub async fn remove(&self, instance_id: &str) -> Option<StartupOperation> {
        self.by_instance.write().await.remove(instance_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn operation(instance_id: &str) -> StartupOperation {
        StartupOperation::new(instance_id.to_string(), "novita_1".to_string(), Utc::now())
    }

    #[tokio::test]
    async fn second_start_for_same_instance_is_rejected() {
        let tracker = StartupOperationTracker::new();
        assert!(tracker.start(operation("inst_1")).await);
        assert!(!tracker.start(operation("inst_1")).await);
    }

    #[tokio::test]
    async fn removing_allows_a_new_operation_to_start() {
        let tracker = StartupOperationTracker::new();
        tracker.start(operation("inst_1")).await;
        tracker.remove("inst_1").await;
        assert!(tracker.start(operation("inst_1")).await);
    }
}

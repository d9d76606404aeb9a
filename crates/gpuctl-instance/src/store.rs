use std::collections::HashMap;

use gpuctl_proto::Instance;
use tokio::sync::RwLock;

/// In-memory instance state map (spec §5 "Shared resources": "all mutators
/// go through a single mutation path; readers may observe intermediate
/// states but never partial entries"). Enforced here by always replacing the
/// whole `Instance` record rather than mutating fields in place.
#[derive(Default)]
pub struct InstanceStore {
    by_id: RwLock<HashMap<String, Instance>>,
    name_index: RwLock<HashMap<String, String>>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: Instance) {
        let mut by_id = self.by_id.write().await;
        let mut name_index = self.name_index.write().await;
        name_index.insert(instance.name.clone(), instance.id.clone());
        by_id.insert(instance.id.clone(), instance);
    }

    pub async fn get(&self, id: &str) -> Option<Instance> {
        self.by_id.read().await.get(id).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<Instance> {
        let id = self.name_index.read().await.get(name).cloned()?;
        self.get(&id).await
    }

    pub async fn list(&self) -> Vec<Instance> {
        self.by_id.read().await.values().cloned().collect()
    }

    /// Replaces the instance atomically. Callers that rename an instance are
    /// not supported (names are assigned once at creation).
    pub async fn replace(&self, instance: Instance) {
        self.by_id.write().await.insert(instance.id.clone(), instance);
    }

    pub async fn remove(&self, id: &str) -> Option<Instance> {
        let removed = self.by_id.write().await.remove(id);
        if let Some(instance) = &removed {
            self.name_index.write().await.remove(&instance.name);
        }
        removed
    }
}

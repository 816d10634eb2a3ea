//! Aggregated liveness reporting across every plugin in a running pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::plugin::Plugin;

/// Tracks the plugins of a running pipeline so the admin façade can answer
/// "is everything up" without reaching into the orchestrator's internals.
#[derive(Default)]
pub struct HealthRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, key: String, plugin: Arc<dyn Plugin>) {
        self.plugins.write().await.insert(key, plugin);
    }

    pub async fn untrack_all(&self) {
        self.plugins.write().await.clear();
    }

    /// `true` only if every tracked plugin reports itself running.
    pub async fn all_running(&self) -> bool {
        let plugins = self.plugins.read().await;
        for plugin in plugins.values() {
            if !plugin.is_running().await {
                return false;
            }
        }
        true
    }

    pub async fn report(&self) -> HashMap<String, bool> {
        let plugins = self.plugins.read().await;
        let mut report = HashMap::with_capacity(plugins.len());
        for (key, plugin) in plugins.iter() {
            report.insert(key.clone(), plugin.is_running().await);
        }
        report
    }
}

use std::sync::Arc;
use std::time::Instant;

use proxy_core::{DeduplicationGate, TaskScheduler};

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,
    pub dedup: Arc<DeduplicationGate>,
    pub metrics: Arc<AppMetrics>,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig, scheduler: TaskScheduler) -> Self {
        let dedup = DeduplicationGate::new(config.dedup_ttl(), config.dedup_capacity);
        Self {
            scheduler: Arc::new(scheduler),
            dedup: Arc::new(dedup),
            metrics: Arc::new(AppMetrics::default()),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }
}

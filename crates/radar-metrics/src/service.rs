use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use radar_lifecycle::Service;

use crate::manager::MetricsManager;

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// How often the stale sweep runs.
    #[serde(default = "default_interval", with = "radar_config::duration")]
    pub interval: Duration,
    /// Pollers idle longer than this are evicted.
    #[serde(default = "default_max_age", with = "radar_config::duration")]
    pub max_age: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_max_age() -> Duration {
    Duration::from_secs(3600)
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig { interval: default_interval(), max_age: default_max_age() }
    }
}

/// Periodic stale-poller sweep as a supervised service.
pub struct StaleCleanupService {
    manager: Arc<MetricsManager>,
    config: CleanupConfig,
}

impl StaleCleanupService {
    pub fn new(manager: Arc<MetricsManager>, config: CleanupConfig) -> Self {
        StaleCleanupService { manager, config }
    }
}

#[async_trait::async_trait]
impl Service for StaleCleanupService {
    fn name(&self) -> &str {
        "metrics-cleanup"
    }

    async fn start(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {
                    let evicted = self.manager.cleanup_stale_pollers(self.config.max_age);
                    if evicted > 0 {
                        debug!(evicted, "stale poller sweep");
                    }
                }
            }
        }
        Ok(())
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// One long-lived subsystem. `start` runs until the token is cancelled;
/// `stop` releases external handles (broker connections, listeners) and is
/// called after the task has returned or been given up on.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn start(&self, ctx: CancellationToken) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Runs registered services as independent tasks under one root cancellation
/// token. Shutdown cancels the root and waits up to `shutdown_timeout` for
/// every task to return; stragglers are aborted.
pub struct Supervisor {
    root: CancellationToken,
    services: Vec<Arc<dyn Service>>,
    tasks: JoinSet<()>,
    shutdown_timeout: Duration,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Supervisor {
            root: CancellationToken::new(),
            services: Vec::new(),
            tasks: JoinSet::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The root token; child tokens handed to services derive from it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.clone()
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Spawn every registered service. Returns immediately; services run
    /// until shutdown.
    pub fn start_all(&mut self) {
        for service in &self.services {
            let service = service.clone();
            let ctx = self.root.child_token();
            let name = service.name().to_string();
            info!(service = %name, "starting service");
            self.tasks.spawn(async move {
                if let Err(err) = service.start(ctx).await {
                    error!(service = %name, error = %err, "service exited with error");
                }
            });
        }
    }

    /// Cancel the root context and drain. After `shutdown_timeout`, abort
    /// whatever is still running, then give every service its `stop` call.
    pub async fn shutdown(mut self) {
        info!("shutdown requested, cancelling root context");
        self.root.cancel();

        let drain = async {
            while self.tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                timeout_secs = self.shutdown_timeout.as_secs(),
                "shutdown timeout expired, aborting remaining tasks"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }

        for service in &self.services {
            if let Err(err) = service.stop().await {
                warn!(service = %service.name(), error = %err, "stop failed");
            }
        }
        info!("shutdown complete");
    }
}

use crate::{context::AppContext, metrics};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<AppContext>,
}

impl JobScheduler {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::expired_session_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::rate_limit_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Delete expired sessions
    async fn expired_session_cleanup_job(scheduler: Arc<Self>) {
        let period = scheduler.context.config.jobs.session_sweep_interval_secs.max(1);
        let mut interval = interval(Duration::from_secs(period));

        loop {
            interval.tick().await;
            info!("Running expired session cleanup");
            let started = Instant::now();

            match tasks::cleanup_expired_sessions(&scheduler.context).await {
                Ok(_) => {
                    metrics::record_background_job("session_sweep", "success", started.elapsed().as_secs_f64());
                }
                Err(e) => {
                    metrics::record_background_job("session_sweep", "failure", started.elapsed().as_secs_f64());
                    error!("Failed to cleanup expired sessions: {}", e);
                }
            }
        }
    }

    /// Forget rate-limit windows that have reset
    async fn rate_limit_cleanup_job(scheduler: Arc<Self>) {
        let period = scheduler.context.config.jobs.rate_limit_cleanup_interval_secs.max(1);
        let mut interval = interval(Duration::from_secs(period));

        loop {
            interval.tick().await;
            let started = Instant::now();

            let removed = tasks::cleanup_rate_limits(&scheduler.context);
            if removed > 0 {
                debug!("Removed {} expired rate limit windows", removed);
            }
            metrics::record_background_job("rate_limit_cleanup", "success", started.elapsed().as_secs_f64());
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}

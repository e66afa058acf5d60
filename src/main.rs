/// StudyAI Account Guard
///
/// Login, signup, token refresh and logout for the StudyAI exam-preparation
/// service, with per-IP rate limits, account lockout and a security event log.

mod account;
mod api;
mod auth;
mod config;
mod context;
mod db;
mod error;
mod flows;
mod jobs;
mod metrics;
mod rate_limit;
mod security;
mod server;
mod session;
mod tokens;
mod validation;

use anyhow::Context;
use config::ServerConfig;
use context::AppContext;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    init_tracing(&config);

    // Create application context
    let ctx = AppContext::new(config)
        .await
        .context("failed to initialize application context")?;
    let ctx = Arc::new(ctx);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await.context("server exited with an error")?;

    Ok(())
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("studyai_guard={},tower_http=debug", config.logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

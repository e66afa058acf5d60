/// Background task implementations
use crate::{context::AppContext, error::GuardResult};
use chrono::Utc;

/// Delete sessions whose refresh token has expired
pub async fn cleanup_expired_sessions(ctx: &AppContext) -> GuardResult<u64> {
    ctx.auth.sessions().sweep_expired(Utc::now()).await
}

/// Drop rate-limit windows that already reset
pub fn cleanup_rate_limits(ctx: &AppContext) -> usize {
    let removed = ctx.auth.limiter().cleanup();
    ctx.throttle.shrink();
    removed
}

/// Health check - verify the account database answers
pub async fn health_check(ctx: &AppContext) -> GuardResult<()> {
    sqlx::query("SELECT 1")
        .fetch_one(&ctx.account_db)
        .await?;

    Ok(())
}

/// Metrics and telemetry for the account guard
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Auth flow outcomes
/// - Security events and lockouts
/// - Background job execution

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // ========== Auth Metrics ==========

    /// Auth flow results by flow and outcome
    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "guard_auth_attempts_total",
        "Total number of auth flow executions",
        &["flow", "outcome"]
    )
    .unwrap();

    /// Accounts that crossed the failed-login threshold
    pub static ref ACCOUNT_LOCKOUTS_TOTAL: IntCounter = register_int_counter!(
        "guard_account_lockouts_total",
        "Total number of account lockouts"
    )
    .unwrap();

    // ========== Security Metrics ==========

    /// Security events by type
    pub static ref SECURITY_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "guard_security_events_total",
        "Total number of security events logged",
        &["type"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "guard_background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "guard_background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    )
    .unwrap();

    /// Expired sessions removed by the sweep
    pub static ref SESSIONS_SWEPT_TOTAL: IntCounter = register_int_counter!(
        "guard_sessions_swept_total",
        "Total number of expired sessions deleted"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record the outcome of an auth flow
pub fn record_auth_attempt(flow: &str, outcome: &str) {
    AUTH_ATTEMPTS_TOTAL.with_label_values(&[flow, outcome]).inc();
}

pub fn record_security_event(event_type: &str) {
    SECURITY_EVENTS_TOTAL.with_label_values(&[event_type]).inc();
}

pub fn record_lockout() {
    ACCOUNT_LOCKOUTS_TOTAL.inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

pub fn record_sessions_swept(count: u64) {
    SESSIONS_SWEPT_TOTAL.inc_by(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_auth_attempt() {
        record_auth_attempt("login", "success");
        let metrics = render_metrics();
        assert!(metrics.contains("guard_auth_attempts_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("session_sweep", "success", 0.02);
        record_sessions_swept(3);
        let metrics = render_metrics();
        assert!(metrics.contains("guard_background_jobs_total"));
        assert!(metrics.contains("guard_sessions_swept_total"));
    }

    #[test]
    fn test_metrics_rendering() {
        record_security_event("login_attempt");
        record_lockout();

        let metrics = render_metrics();
        assert!(metrics.contains("# HELP"));
        assert!(metrics.contains("guard_security_events_total"));
        assert!(metrics.contains("guard_account_lockouts_total"));
    }
}

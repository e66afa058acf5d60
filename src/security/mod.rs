/// Security event logging
///
/// Append-only audit trail for auth activity. Events are kept in a bounded
/// in-memory buffer, emitted on the `security` tracing target, and counted in
/// Prometheus. Logging never fails the surrounding request.
pub mod heuristics;

use crate::metrics;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::Mutex,
};

/// Kind of security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginAttempt,
    SignupAttempt,
    SuspiciousActivity,
    RateLimitExceeded,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginAttempt => "login_attempt",
            SecurityEventKind::SignupAttempt => "signup_attempt",
            SecurityEventKind::SuspiciousActivity => "suspicious_activity",
            SecurityEventKind::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

/// Event as submitted by a flow
#[derive(Debug, Clone)]
pub struct NewSecurityEvent {
    pub kind: SecurityEventKind,
    pub ip: String,
    pub user_agent: String,
    pub details: Value,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewSecurityEvent {
    pub fn new(kind: SecurityEventKind, ip: &str, user_agent: &str, details: Value) -> Self {
        Self {
            kind,
            ip: ip.to_string(),
            user_agent: user_agent.to_string(),
            details,
            timestamp: None,
        }
    }
}

/// Stored event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SecurityEventKind,
    pub ip: String,
    pub user_agent: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Random alphanumeric identifier
pub fn generate_event_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Bounded append-only event log
pub struct SecurityEventLogger {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
}

impl SecurityEventLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an event, filling in its id and timestamp
    pub fn log(&self, event: NewSecurityEvent) -> SecurityEvent {
        let event = SecurityEvent {
            id: generate_event_id(16),
            kind: event.kind,
            ip: event.ip,
            user_agent: event.user_agent,
            details: event.details,
            timestamp: event.timestamp.unwrap_or_else(Utc::now),
        };

        tracing::info!(
            target: "security",
            event_id = %event.id,
            event_type = event.kind.as_str(),
            ip = %event.ip,
            user_agent = %event.user_agent,
            details = %event.details,
            "Security event"
        );
        metrics::record_security_event(event.kind.as_str());

        let mut events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());

        event
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent events, oldest first
    #[cfg(test)]
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_fills_id_and_timestamp() {
        let logger = SecurityEventLogger::new(10);
        let before = Utc::now();
        let event = logger.log(NewSecurityEvent::new(
            SecurityEventKind::LoginAttempt,
            "10.0.0.1",
            "Mozilla/5.0",
            json!({ "success": false, "reason": "invalid_password" }),
        ));

        assert_eq!(event.id.len(), 16);
        assert!(event.id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(event.timestamp >= before);
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn test_supplied_timestamp_is_kept() {
        let logger = SecurityEventLogger::new(10);
        let at = Utc::now() - chrono::Duration::hours(2);
        let mut event = NewSecurityEvent::new(SecurityEventKind::SignupAttempt, "ip", "ua", json!({}));
        event.timestamp = Some(at);

        assert_eq!(logger.log(event).timestamp, at);
    }

    #[test]
    fn test_ids_are_unique() {
        let logger = SecurityEventLogger::new(100);
        let a = logger.log(NewSecurityEvent::new(SecurityEventKind::RateLimitExceeded, "ip", "ua", json!({})));
        let b = logger.log(NewSecurityEvent::new(SecurityEventKind::RateLimitExceeded, "ip", "ua", json!({})));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_buffer_drops_oldest_past_capacity() {
        let logger = SecurityEventLogger::new(2);
        for n in 0..3 {
            logger.log(NewSecurityEvent::new(
                SecurityEventKind::SuspiciousActivity,
                "ip",
                "ua",
                json!({ "n": n }),
            ));
        }

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].details["n"], 1);
        assert_eq!(recent[1].details["n"], 2);
    }

    #[test]
    fn test_event_serializes_type_name() {
        let logger = SecurityEventLogger::new(1);
        let event = logger.log(NewSecurityEvent::new(SecurityEventKind::RateLimitExceeded, "ip", "ua", json!({})));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "rate_limit_exceeded");
    }
}

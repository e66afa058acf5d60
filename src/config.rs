/// Configuration management for the StudyAI account guard
use crate::error::{GuardError, GuardResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
    pub jobs: JobsConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Mark auth cookies `Secure` (production deployments)
    pub secure_cookies: bool,
}

/// A fixed-window request budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRule {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl RateRule {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

/// Lockout and per-flow rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Consecutive failures before an account locks
    pub lockout_threshold: u32,
    pub lockout_duration_secs: u64,
    pub login_rate: RateRule,
    pub signup_rate: RateRule,
    pub refresh_rate: RateRule,
    /// Budget above which a client is flagged as suspicious (never blocked)
    pub suspicious_rate: RateRule,
    /// Security events kept in memory
    pub event_log_capacity: usize,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`; only safe behind a proxy that sets them
    pub trust_proxy_headers: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            lockout_threshold: 5,
            lockout_duration_secs: 15 * 60,
            login_rate: RateRule::new(5, 15 * 60),
            signup_rate: RateRule::new(3, 60 * 60),
            refresh_rate: RateRule::new(10, 60),
            suspicious_rate: RateRule::new(10, 60),
            event_log_capacity: 10_000,
            trust_proxy_headers: false,
        }
    }
}

/// Global request throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

/// Background job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub session_sweep_interval_secs: u64,
    pub rate_limit_cleanup_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn env_rule(prefix: &str, default: RateRule) -> RateRule {
    RateRule {
        max_requests: env_or(&format!("{}_MAX", prefix), default.max_requests),
        window_secs: env_or(&format!("{}_WINDOW_SECS", prefix), default.window_secs),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> GuardResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("GUARD_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("GUARD_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| GuardError::Validation("Invalid port number".to_string()))?;
        let version = env::var("GUARD_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let data_directory: PathBuf = env::var("GUARD_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let account_db = env::var("GUARD_ACCOUNT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("account.sqlite"));

        let jwt_secret = env::var("GUARD_JWT_SECRET")
            .map_err(|_| GuardError::Validation("JWT secret required".to_string()))?;
        let secure_cookies = env_or("GUARD_SECURE_COOKIES", false);

        let defaults = SecurityConfig::default();
        let security = SecurityConfig {
            lockout_threshold: env_or("GUARD_LOCKOUT_THRESHOLD", defaults.lockout_threshold),
            lockout_duration_secs: env_or("GUARD_LOCKOUT_DURATION_SECS", defaults.lockout_duration_secs),
            login_rate: env_rule("GUARD_LOGIN_RATE", defaults.login_rate),
            signup_rate: env_rule("GUARD_SIGNUP_RATE", defaults.signup_rate),
            refresh_rate: env_rule("GUARD_REFRESH_RATE", defaults.refresh_rate),
            suspicious_rate: env_rule("GUARD_SUSPICIOUS_RATE", defaults.suspicious_rate),
            event_log_capacity: env_or("GUARD_EVENT_LOG_CAPACITY", defaults.event_log_capacity),
            trust_proxy_headers: env_or("GUARD_TRUST_PROXY_HEADERS", defaults.trust_proxy_headers),
        };

        let rate_limit = RateLimitConfig {
            enabled: env_or("GUARD_RATE_LIMITS_ENABLED", true),
            requests_per_minute: env_or("GUARD_RATE_LIMIT_REQUESTS_PER_MINUTE", 600),
        };

        let jobs = JobsConfig {
            session_sweep_interval_secs: env_or("GUARD_SESSION_SWEEP_INTERVAL_SECS", 3600),
            rate_limit_cleanup_interval_secs: env_or("GUARD_RATE_LIMIT_CLEANUP_INTERVAL_SECS", 300),
        };

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let json = env::var("GUARD_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
            },
            authentication: AuthConfig {
                jwt_secret,
                secure_cookies,
            },
            security,
            rate_limit,
            jobs,
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> GuardResult<()> {
        if self.service.hostname.is_empty() {
            return Err(GuardError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(GuardError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.security.lockout_threshold == 0 {
            return Err(GuardError::Validation(
                "Lockout threshold must be at least 1".to_string(),
            ));
        }

        let rules = [
            ("login", &self.security.login_rate),
            ("signup", &self.security.signup_rate),
            ("refresh", &self.security.refresh_rate),
            ("suspicious", &self.security.suspicious_rate),
        ];
        for (name, rule) in rules {
            if rule.max_requests == 0 || rule.window_secs == 0 {
                return Err(GuardError::Validation(format!(
                    "Rate rule '{}' needs a non-zero budget and window",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn lockout_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.security.lockout_duration_secs as i64)
    }

    /// Minimal configuration for tests
    #[cfg(test)]
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                account_db: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-32b".to_string(),
                secure_cookies: false,
            },
            security: SecurityConfig {
                trust_proxy_headers: true,
                ..SecurityConfig::default()
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                requests_per_minute: 600,
            },
            jobs: JobsConfig {
                session_sweep_interval_secs: 3600,
                rate_limit_cleanup_interval_secs: 300,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                json: false,
            },
        }
    }
}

/// Request and credential heuristics
///
/// Everything here is advisory. Callers log what these functions find and
/// carry on with the request.
use crate::{
    api::middleware::ClientInfo,
    config::RateRule,
    rate_limit::RateLimiter,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref BOT_USER_AGENT: Regex =
        Regex::new(r"(?i)bot|crawler|spider|scraper|curl|wget|python|java").unwrap();
    static ref SQL_PUNCTUATION: Regex = Regex::new(r#"['";\\|*%<>{}\[\]]"#).unwrap();
    static ref SQL_KEYWORD: Regex =
        Regex::new(r"(?i)union|select|insert|delete|update|drop|create|alter|exec|execute").unwrap();
    static ref SCRIPT_CONTENT: Regex = Regex::new(r"(?i)<script|javascript:|on\w+=").unwrap();
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)on\w+=").unwrap();
    static ref JAVASCRIPT_PROTOCOL: Regex = Regex::new(r"(?i)javascript:").unwrap();
}

/// Reasons a request looks automated or abusive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspicionReport {
    pub reasons: Vec<String>,
}

impl SuspicionReport {
    pub fn is_suspicious(&self) -> bool {
        !self.reasons.is_empty()
    }
}

/// Flag bot-like agents, POSTs without a referer, and bursts from one IP
///
/// The burst check consumes one request from the `suspicious:{ip}` budget.
pub fn detect_suspicious_activity(
    client: &ClientInfo,
    limiter: &RateLimiter,
    rule: &RateRule,
) -> SuspicionReport {
    let mut reasons = Vec::new();

    if BOT_USER_AGENT.is_match(&client.user_agent) {
        reasons.push("Bot-like user agent detected".to_string());
    }

    if client.referer.is_none() && client.method == axum::http::Method::POST {
        reasons.push("Missing referer on POST request".to_string());
    }

    if !limiter.check("suspicious", &client.ip, rule).allowed {
        reasons.push("Too many requests from IP".to_string());
    }

    SuspicionReport { reasons }
}

/// Injection-looking content in a password
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordSecurityReport {
    pub warnings: Vec<String>,
}

impl PasswordSecurityReport {
    pub fn is_secure(&self) -> bool {
        self.warnings.is_empty()
    }
}

pub fn check_password_security(password: &str) -> PasswordSecurityReport {
    let mut warnings = Vec::new();

    if SQL_PUNCTUATION.is_match(password) || SQL_KEYWORD.is_match(password) {
        warnings.push("Password contains potentially dangerous characters".to_string());
    }

    if SCRIPT_CONTENT.is_match(password) {
        warnings.push("Password contains script-like content".to_string());
    }

    if password.chars().count() > 200 {
        warnings.push("Password is unusually long".to_string());
    }

    PasswordSecurityReport { warnings }
}

/// Strip markup-ish content from free text before storing it
pub fn sanitize_input(input: &str) -> String {
    let without_brackets: String = input.chars().filter(|c| *c != '<' && *c != '>').collect();
    let without_protocol = JAVASCRIPT_PROTOCOL.replace_all(&without_brackets, "");
    EVENT_HANDLER.replace_all(&without_protocol, "").trim().to_string()
}

/// Coarse device fingerprint from request headers, at most 32 characters
pub fn device_fingerprint(user_agent: &str, accept_language: &str, accept_encoding: &str) -> String {
    let encoded = STANDARD.encode(format!("{}|{}|{}", user_agent, accept_language, accept_encoding));
    encoded.chars().take(32).collect()
}

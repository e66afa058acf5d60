/// Request inspection helpers shared by handlers and middleware
use crate::{context::AppContext, security::heuristics};
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, header, Extensions, HeaderMap, Method},
};
use axum_extra::extract::cookie::CookieJar;
use std::{convert::Infallible, net::SocketAddr};

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Access token from the Authorization header, falling back to the cookie
pub fn extract_access_token(headers: &HeaderMap, jar: &CookieJar) -> Option<String> {
    extract_bearer_token(headers).or_else(|| cookie_value(jar, ACCESS_TOKEN_COOKIE))
}

pub fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

/// What the auth flows need to know about the caller
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub method: Method,
    pub device_fingerprint: String,
}

impl ClientInfo {
    pub fn from_parts(headers: &HeaderMap, extensions: &Extensions, method: Method, trust_proxy: bool) -> Self {
        let user_agent = header_str(headers, header::USER_AGENT.as_str()).unwrap_or_default();
        let accept_language = header_str(headers, header::ACCEPT_LANGUAGE.as_str()).unwrap_or_default();
        let accept_encoding = header_str(headers, header::ACCEPT_ENCODING.as_str()).unwrap_or_default();

        Self {
            ip: Self::client_ip(headers, extensions, trust_proxy),
            device_fingerprint: heuristics::device_fingerprint(&user_agent, &accept_language, &accept_encoding),
            referer: header_str(headers, header::REFERER.as_str()).filter(|r| !r.is_empty()),
            user_agent,
            method,
        }
    }

    /// Client address: proxy headers when trusted, then the socket peer, else `unknown`
    pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> String {
        if trust_proxy {
            if let Some(ip) = Self::forwarded_ip(headers) {
                return ip;
            }
        }

        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
        if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
            if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
                return Some(first.to_string());
            }
        }

        header_str(headers, "x-real-ip")
            .or_else(|| header_str(headers, "remote-addr"))
            .filter(|s| !s.is_empty())
    }

    #[cfg(test)]
    pub fn for_tests(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64)".to_string(),
            referer: Some("http://localhost/auth/signin".to_string()),
            method: Method::POST,
            device_fingerprint: "test-fingerprint".to_string(),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for ClientInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppContext) -> Result<Self, Self::Rejection> {
        Ok(ClientInfo::from_parts(
            &parts.headers,
            &parts.extensions,
            parts.method.clone(),
            state.config.security.trust_proxy_headers,
        ))
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
}

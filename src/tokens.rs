/// Access and refresh token issuance
///
/// Tokens are HS256 JWTs. Claims are closed structs; the `type` claim tells
/// access and refresh tokens apart so a refresh token can never be used as an
/// access token and vice versa.
use crate::db::account::Role;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Token verification failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token type")]
    WrongType,

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Value of the `type` claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Identity fields carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_class: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,
}

/// Decoded access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(flatten)]
    pub user: UserClaims,
    pub remember_me: bool,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Decoded refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub remember_me: bool,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Result of verifying a token of either kind
#[derive(Debug, Clone)]
pub enum VerifiedToken {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

impl VerifiedToken {
    pub fn subject(&self) -> &str {
        match self {
            VerifiedToken::Access(claims) => &claims.user.sub,
            VerifiedToken::Refresh(claims) => &claims.sub,
        }
    }
}

/// Lifetimes selected by the remember-me flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
}

impl TokenTtl {
    pub fn for_remember_me(remember_me: bool) -> Self {
        if remember_me {
            Self {
                access: Duration::days(7),
                refresh: Duration::days(30),
            }
        } else {
            Self {
                access: Duration::hours(1),
                refresh: Duration::days(7),
            }
        }
    }
}

/// Freshly issued access/refresh pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub remember_me: bool,
    pub ttl: TokenTtl,
    pub issued_at: DateTime<Utc>,
}

impl TokenPair {
    /// Access token lifetime in seconds
    pub fn expires_in(&self) -> i64 {
        self.ttl.access.num_seconds()
    }

    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        self.issued_at + self.ttl.refresh
    }
}

/// Signs and verifies tokens with a shared HMAC secret
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenIssuer {
    pub fn new(jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
        }
    }

    #[cfg(test)]
    pub fn issue_access_token(
        &self,
        user: &UserClaims,
        remember_me: bool,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_access_token_at(user, remember_me, ttl, Utc::now())
    }

    pub fn issue_access_token_at(
        &self,
        user: &UserClaims,
        remember_me: bool,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = AccessClaims {
            user: user.clone(),
            remember_me,
            kind: TokenKind::Access,
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        self.sign(&claims)
    }

    #[cfg(test)]
    pub fn issue_refresh_token(
        &self,
        subject: &str,
        remember_me: bool,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.issue_refresh_token_at(subject, remember_me, ttl, Utc::now())
    }

    pub fn issue_refresh_token_at(
        &self,
        subject: &str,
        remember_me: bool,
        ttl: Duration,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = RefreshClaims {
            sub: subject.to_string(),
            kind: TokenKind::Refresh,
            remember_me,
            jti: Uuid::new_v4().to_string(),
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
        };
        self.sign(&claims)
    }

    /// Issue a new access/refresh pair for a user
    pub fn issue_pair(&self, user: &UserClaims, remember_me: bool) -> Result<TokenPair, TokenError> {
        let ttl = TokenTtl::for_remember_me(remember_me);
        let issued_at = Utc::now();

        Ok(TokenPair {
            access_token: self.issue_access_token_at(user, remember_me, ttl.access, issued_at)?,
            refresh_token: self.issue_refresh_token_at(&user.sub, remember_me, ttl.refresh, issued_at)?,
            remember_me,
            ttl,
            issued_at,
        })
    }

    /// Verify signature and expiry, then decode into the claims matching the `type` claim
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, TokenError> {
        let data = jsonwebtoken::decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!("Token verification failed: {}", e);
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                    _ => TokenError::Malformed,
                }
            })?;

        // Untyped tokens predate the `type` claim and are access tokens
        let kind = match data.claims.get("type") {
            None => TokenKind::Access,
            Some(value) => {
                serde_json::from_value::<TokenKind>(value.clone()).map_err(|_| TokenError::Malformed)?
            }
        };

        match kind {
            TokenKind::Access => {
                let mut claims = data.claims;
                if let Some(object) = claims.as_object_mut() {
                    object.insert("type".to_string(), serde_json::json!("access"));
                    object
                        .entry("jti")
                        .or_insert_with(|| serde_json::Value::String(String::new()));
                }
                serde_json::from_value(claims)
                    .map(VerifiedToken::Access)
                    .map_err(|_| TokenError::Malformed)
            }
            TokenKind::Refresh => serde_json::from_value(data.claims)
                .map(VerifiedToken::Refresh)
                .map_err(|_| TokenError::Malformed),
        }
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        match self.verify(token)? {
            VerifiedToken::Access(claims) => Ok(claims),
            VerifiedToken::Refresh(_) => Err(TokenError::WrongType),
        }
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        match self.verify(token)? {
            VerifiedToken::Refresh(claims) => Ok(claims),
            VerifiedToken::Access(_) => Err(TokenError::WrongType),
        }
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

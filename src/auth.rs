/// Authentication extractors
use crate::{
    api::middleware::extract_access_token,
    context::AppContext,
    error::GuardError,
    tokens::AccessClaims,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use axum_extra::extract::cookie::CookieJar;

/// Authenticated context - verifies the access token from the Authorization
/// header or the `access_token` cookie
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: AccessClaims,
}

impl AuthContext {
    pub fn account_id(&self) -> &str {
        &self.claims.user.sub
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = GuardError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let token = extract_access_token(&parts.headers, &jar)
            .ok_or_else(|| GuardError::Authentication("Authentication required".to_string()))?;

        let claims = state.auth.tokens().verify_access(&token)?;

        Ok(AuthContext { claims })
    }
}

/// Auth flows: login, signup, refresh, logout and me
///
/// Each flow is a linear pipeline over the rate limiter, validators, lock
/// tracker, token issuer and session store. Failures the caller did not cause
/// are logged here with context and leave as a generic 500.
use crate::{
    account::{
        AccountManager, LockTracker, LoginRequest, LogoutResponse, MeResponse,
        NewAccount, PublicUser, SignupRequest, TokenResponse,
    },
    api::middleware::ClientInfo,
    config::{RateRule, ServerConfig},
    db::account::{Account, Role},
    error::{GuardError, GuardResult},
    metrics,
    rate_limit::RateLimiter,
    security::{
        heuristics::{self, check_password_security, detect_suspicious_activity},
        NewSecurityEvent, SecurityEventKind, SecurityEventLogger,
    },
    session::SessionStore,
    tokens::{AccessClaims, TokenIssuer, TokenPair, UserClaims},
    validation::{password_strength, validate_login_data, validate_signup_data, SignupData},
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const ACCOUNT_DEACTIVATED: &str = "Account is deactivated. Please contact support.";
const USER_NOT_FOUND_OR_INACTIVE: &str = "User not found or inactive";

/// Tokens handed out by login, signup and refresh
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub body: TokenResponse,
    pub remember_me: bool,
}

impl IssuedSession {
    fn new(pair: TokenPair, account: &Account) -> Self {
        Self {
            body: TokenResponse {
                expires_in: pair.expires_in(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
                token_type: "Bearer".to_string(),
                user: PublicUser::from(account),
            },
            remember_me: pair.remember_me,
        }
    }

    /// Cookie lifetime matching the remember-me choice
    pub fn cookie_max_age(&self) -> Duration {
        if self.remember_me {
            Duration::days(30)
        } else {
            Duration::days(7)
        }
    }
}

fn user_claims(account: &Account) -> UserClaims {
    UserClaims {
        sub: account.id.to_string(),
        email: account.email.clone(),
        name: account.name.clone(),
        role: account.role,
        current_class: account.current_class,
        school_name: account.school_name.clone(),
    }
}

fn outcome_label(err: &GuardError) -> &'static str {
    match err {
        GuardError::RateLimitExceeded { .. } => "rate_limited",
        GuardError::Validation(_) | GuardError::InvalidInput(_) => "invalid_input",
        GuardError::AccountLocked { .. } => "locked",
        GuardError::Conflict(_) => "conflict",
        _ if err.is_internal() => "error",
        _ => "unauthorized",
    }
}

/// Owns every component the auth flows touch
pub struct AuthService {
    config: Arc<ServerConfig>,
    accounts: AccountManager,
    lockout: LockTracker,
    sessions: SessionStore,
    tokens: TokenIssuer,
    limiter: RateLimiter,
    events: SecurityEventLogger,
}

impl AuthService {
    pub fn new(config: Arc<ServerConfig>, db: SqlitePool) -> Self {
        Self {
            accounts: AccountManager::new(db.clone()),
            lockout: LockTracker::new(
                db.clone(),
                config.security.lockout_threshold,
                config.lockout_duration(),
            ),
            sessions: SessionStore::new(db),
            tokens: TokenIssuer::new(&config.authentication.jwt_secret),
            limiter: RateLimiter::new(),
            events: SecurityEventLogger::new(config.security.event_log_capacity),
            config,
        }
    }

    #[cfg(test)]
    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn events(&self) -> &SecurityEventLogger {
        &self.events
    }

    /// Authenticate with email and password
    pub async fn login(&self, request: LoginRequest, client: &ClientInfo) -> GuardResult<IssuedSession> {
        let result = self.run_login(request, client).await;
        self.finish("login", client, result)
    }

    /// Register a new account and sign it in
    pub async fn signup(&self, request: SignupRequest, client: &ClientInfo) -> GuardResult<IssuedSession> {
        let result = self.run_signup(request, client).await;
        if let Err(err) = &result {
            if err.is_internal() {
                self.log_event(
                    SecurityEventKind::SignupAttempt,
                    client,
                    json!({ "success": false, "error": "internal" }),
                );
            }
        }
        self.finish("signup", client, result)
    }

    /// Rotate a refresh token into a new pair
    pub async fn refresh(&self, refresh_token: Option<String>, client: &ClientInfo) -> GuardResult<IssuedSession> {
        let result = self.run_refresh(refresh_token, client).await;
        self.finish("refresh", client, result)
    }

    /// Profile of the account an access token was issued to
    pub async fn me(&self, claims: &AccessClaims) -> GuardResult<MeResponse> {
        let account = self
            .accounts
            .get_by_subject(&claims.user.sub)
            .await
            .map_err(|e| {
                tracing::error!(subject = %claims.user.sub, "Account lookup failed: {}", e);
                e
            })?
            .filter(|account| account.is_active)
            .ok_or_else(|| GuardError::Authentication(USER_NOT_FOUND_OR_INACTIVE.to_string()))?;

        Ok(MeResponse::from(&account))
    }

    /// Revoke what can be identified and always report success
    pub async fn logout(
        &self,
        access_token: Option<String>,
        refresh_token: Option<String>,
        client: &ClientInfo,
    ) -> LogoutResponse {
        let subject = access_token
            .as_deref()
            .and_then(|token| self.tokens.verify(token).ok())
            .map(|verified| verified.subject().to_string())
            .or_else(|| {
                refresh_token
                    .as_deref()
                    .and_then(|token| self.tokens.verify_refresh(token).ok())
                    .map(|claims| claims.sub)
            });

        let Some(subject) = subject else {
            tracing::debug!(ip = %client.ip, "Logout without a verifiable token");
            metrics::record_auth_attempt("logout", "anonymous");
            return LogoutResponse {
                message: "Successfully logged out".to_string(),
            };
        };

        let message = match self.revoke_sessions(&subject, refresh_token.as_deref()).await {
            Ok(revoked) => {
                self.log_event(
                    SecurityEventKind::LoginAttempt,
                    client,
                    json!({ "userId": subject, "action": "logout", "success": true, "sessionsRevoked": revoked }),
                );
                metrics::record_auth_attempt("logout", "success");
                "Successfully logged out"
            }
            Err(e) => {
                tracing::error!(subject = %subject, ip = %client.ip, "Logout failed to revoke sessions: {}", e);
                metrics::record_auth_attempt("logout", "error");
                "Logged out with errors"
            }
        };

        LogoutResponse {
            message: message.to_string(),
        }
    }

    async fn run_login(&self, request: LoginRequest, client: &ClientInfo) -> GuardResult<IssuedSession> {
        let security = &self.config.security;
        self.enforce_rate_limit(
            "login",
            client,
            &security.login_rate,
            "Too many login attempts. Please try again later.",
        )?;
        self.flag_suspicious_client(client, "login");

        let validation = validate_login_data(&request.email, &request.password);
        if !validation.is_valid {
            return Err(GuardError::InvalidInput(validation.errors));
        }

        let email = request.email.trim().to_lowercase();
        self.flag_insecure_password(&request.password, &email, client);

        let now = Utc::now();
        if let Some(until) = self.lockout.check(&email, now).await?.locked_until() {
            self.log_login_failure(client, &email, "account_locked");
            return Err(GuardError::AccountLocked { until });
        }

        let Some(account) = self.accounts.get_by_email(&email).await? else {
            self.lockout.record_failure(&email, now).await?;
            self.log_login_failure(client, &email, "user_not_found");
            return Err(GuardError::Authentication(INVALID_CREDENTIALS.to_string()));
        };

        if !account.is_active {
            self.log_login_failure(client, &email, "account_inactive");
            return Err(GuardError::Authentication(ACCOUNT_DEACTIVATED.to_string()));
        }

        if !self.accounts.verify_password(&account, &request.password).await? {
            self.lockout.record_failure(&email, now).await?;
            self.log_login_failure(client, &email, "invalid_password");
            return Err(GuardError::Authentication(INVALID_CREDENTIALS.to_string()));
        }

        self.lockout.record_success(account.id).await?;
        self.accounts.update_last_login(account.id, now).await?;

        let issued = self.start_session(&account, request.remember_me, client).await?;

        self.log_event(
            SecurityEventKind::LoginAttempt,
            client,
            json!({ "email": email, "success": true, "rememberMe": request.remember_me }),
        );
        tracing::info!(account_id = account.id, ip = %client.ip, "Login succeeded");

        Ok(issued)
    }

    async fn run_signup(&self, request: SignupRequest, client: &ClientInfo) -> GuardResult<IssuedSession> {
        self.enforce_rate_limit(
            "signup",
            client,
            &self.config.security.signup_rate,
            "Too many signup attempts. Please try again later.",
        )?;

        let confirm_password = request
            .confirm_password
            .as_deref()
            .unwrap_or(&request.password);
        let validation = validate_signup_data(&SignupData {
            name: &request.name,
            email: &request.email,
            password: &request.password,
            confirm_password,
            role: &request.role,
            current_class: request.current_class,
            school_name: request.school_name.as_deref(),
        });
        if !validation.is_valid {
            return Err(GuardError::InvalidInput(validation.errors));
        }

        let email = request.email.trim().to_lowercase();
        self.flag_insecure_password(&request.password, &email, client);
        let strength = password_strength(&request.password);

        if self.accounts.email_exists(&email).await? {
            return Err(self.reject_duplicate_email(client, &email));
        }

        let role: Role = request
            .role
            .parse()
            .map_err(|_| GuardError::InvalidInput(vec!["Invalid role selected".to_string()]))?;

        let new_account = NewAccount {
            email: email.clone(),
            name: heuristics::sanitize_input(request.name.trim()),
            password: request.password,
            role,
            current_class: request.current_class,
            school_name: request
                .school_name
                .as_deref()
                .map(heuristics::sanitize_input)
                .filter(|school| !school.is_empty()),
        };

        let account = match self.accounts.create_account(new_account).await {
            Ok(account) => account,
            Err(GuardError::Conflict(_)) => return Err(self.reject_duplicate_email(client, &email)),
            Err(e) => return Err(e),
        };

        // Signup always signs in with remember-me lifetimes
        let issued = self.start_session(&account, true, client).await?;

        self.log_event(
            SecurityEventKind::SignupAttempt,
            client,
            json!({
                "email": account.email,
                "success": true,
                "passwordStrength": strength.score,
                "passwordFeedback": strength.feedback,
            }),
        );
        tracing::info!(account_id = account.id, role = %account.role, "Account created");

        Ok(issued)
    }

    async fn run_refresh(&self, refresh_token: Option<String>, client: &ClientInfo) -> GuardResult<IssuedSession> {
        self.enforce_rate_limit(
            "refresh",
            client,
            &self.config.security.refresh_rate,
            "Too many refresh attempts. Please try again later.",
        )?;

        let token = refresh_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GuardError::Validation("Refresh token is required".to_string()))?;

        let claims = self.tokens.verify_refresh(&token)?;

        let now = Utc::now();
        let session = self.sessions.validate_refresh_token(&token, now).await?;
        if session.account_id.to_string() != claims.sub {
            tracing::warn!(session_id = %session.id, subject = %claims.sub, "Refresh token subject does not own its session");
            return Err(GuardError::Authentication("Invalid or expired refresh token".to_string()));
        }

        let account = self
            .accounts
            .get_by_subject(&claims.sub)
            .await?
            .filter(|account| account.is_active)
            .ok_or_else(|| GuardError::Authentication(USER_NOT_FOUND_OR_INACTIVE.to_string()))?;

        // Only the request that deactivates the old session may rotate it
        if !self.sessions.invalidate(&session.id).await? {
            tracing::warn!(session_id = %session.id, ip = %client.ip, "Refresh token replayed after rotation");
            return Err(GuardError::Authentication("Invalid or expired refresh token".to_string()));
        }

        let issued = self.start_session(&account, claims.remember_me, client).await?;

        tracing::debug!(account_id = account.id, old_session = %session.id, "Refresh token rotated");

        Ok(issued)
    }

    /// Issue a pair and persist the session backing its refresh token
    async fn start_session(
        &self,
        account: &Account,
        remember_me: bool,
        client: &ClientInfo,
    ) -> GuardResult<IssuedSession> {
        let pair = self.tokens.issue_pair(&user_claims(account), remember_me)?;

        self.sessions
            .create(
                account.id,
                &pair.refresh_token,
                &client.device_fingerprint,
                &client.ip,
                pair.refresh_expires_at(),
            )
            .await?;

        Ok(IssuedSession::new(pair, account))
    }

    async fn revoke_sessions(&self, subject: &str, refresh_token: Option<&str>) -> GuardResult<u64> {
        let mut revoked = 0;

        if let Some(token) = refresh_token {
            if let Some(session) = self.sessions.find_by_refresh_token(token).await? {
                if session.account_id.to_string() != subject {
                    tracing::warn!(session_id = %session.id, subject = %subject, "Logout refresh cookie belongs to another account");
                } else if self.sessions.invalidate(&session.id).await? {
                    revoked += 1;
                }
            }
        }

        if let Ok(account_id) = subject.parse::<i64>() {
            revoked += self.sessions.invalidate_all_for_user(account_id).await?;
        }

        Ok(revoked)
    }

    fn enforce_rate_limit(
        &self,
        action: &str,
        client: &ClientInfo,
        rule: &RateRule,
        message: &str,
    ) -> GuardResult<()> {
        let decision = self.limiter.check(action, &client.ip, rule);
        if decision.allowed {
            return Ok(());
        }

        self.log_event(
            SecurityEventKind::RateLimitExceeded,
            client,
            json!({ "endpoint": action }),
        );

        Err(GuardError::RateLimitExceeded {
            message: message.to_string(),
            retry_after: decision.retry_after(Utc::now()),
        })
    }

    fn flag_suspicious_client(&self, client: &ClientInfo, endpoint: &str) {
        let report = detect_suspicious_activity(client, &self.limiter, &self.config.security.suspicious_rate);
        if report.is_suspicious() {
            self.log_event(
                SecurityEventKind::SuspiciousActivity,
                client,
                json!({ "reasons": report.reasons, "endpoint": endpoint }),
            );
        }
    }

    fn flag_insecure_password(&self, password: &str, email: &str, client: &ClientInfo) {
        let report = check_password_security(password);
        if !report.is_secure() {
            self.log_event(
                SecurityEventKind::SuspiciousActivity,
                client,
                json!({ "warnings": report.warnings, "email": email }),
            );
        }
    }

    fn reject_duplicate_email(&self, client: &ClientInfo, email: &str) -> GuardError {
        self.log_event(
            SecurityEventKind::SignupAttempt,
            client,
            json!({ "email": email, "success": false, "reason": "email_exists" }),
        );
        GuardError::Conflict("An account with this email already exists".to_string())
    }

    fn log_login_failure(&self, client: &ClientInfo, email: &str, reason: &str) {
        self.log_event(
            SecurityEventKind::LoginAttempt,
            client,
            json!({ "email": email, "success": false, "reason": reason }),
        );
    }

    fn log_event(&self, kind: SecurityEventKind, client: &ClientInfo, details: Value) {
        self.events
            .log(NewSecurityEvent::new(kind, &client.ip, &client.user_agent, details));
    }

    fn finish<T>(&self, flow: &str, client: &ClientInfo, result: GuardResult<T>) -> GuardResult<T> {
        match &result {
            Ok(_) => metrics::record_auth_attempt(flow, "success"),
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(flow, ip = %client.ip, "Auth flow failed: {}", err);
                } else {
                    tracing::debug!(flow, ip = %client.ip, "Auth flow rejected: {}", err);
                }
                metrics::record_auth_attempt(flow, outcome_label(err));
            }
        }
        result
    }
}

/// Account management system
///
/// Handles account storage, password hashing, lockout tracking, and the
/// request/response shapes of the auth endpoints.

mod lockout;
mod manager;

pub use lockout::{LockState, LockTracker};
pub use manager::{AccountManager, NewAccount};

use crate::db::account::{Account, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Login request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Signup request
///
/// A missing `confirmPassword` is treated as matching `password`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub current_class: Option<i64>,
    #[serde(default)]
    pub school_name: Option<String>,
}

/// Token refresh request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Account fields safe to hand to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub current_class: Option<i64>,
    pub school_name: Option<String>,
    pub email_verified: bool,
}

impl From<&Account> for PublicUser {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            name: account.name.clone(),
            role: account.role,
            current_class: account.current_class,
            school_name: account.school_name.clone(),
            email_verified: account.email_verified,
        }
    }
}

/// Response for login, signup and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: PublicUser,
}

/// Response for `GET /me`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: PublicUser,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&Account> for MeResponse {
    fn from(account: &Account) -> Self {
        Self {
            user: PublicUser::from(account),
            created_at: account.created_at,
            last_login: account.last_login,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub message: String,
}

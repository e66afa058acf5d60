/// Account manager implementation using runtime queries
/// This version uses sqlx runtime query building instead of compile-time macros
/// to avoid needing DATABASE_URL during compilation

use crate::{
    db::account::{Account, Role},
    error::{GuardError, GuardResult},
};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::task;

/// Fields for a new account, already validated and sanitized
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
    pub current_class: Option<i64>,
    pub school_name: Option<String>,
}

/// Hash a password using Argon2id with a random salt
pub fn hash_password(password: &str) -> GuardResult<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GuardError::Internal(format!("Password hashing failed: {}", e)))
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create a new account
    ///
    /// Hashing runs on the blocking pool. A concurrent signup that wins the
    /// UNIQUE constraint surfaces as a conflict.
    pub async fn create_account(&self, new: NewAccount) -> GuardResult<Account> {
        let email = new.email.trim().to_lowercase();
        let password = new.password;

        let password_hash = task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| GuardError::Internal(format!("Password hashing task failed: {}", e)))??;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO account (email, name, password_hash, role, current_class, school_name, is_active, email_verified, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        )
        .bind(&email)
        .bind(&new.name)
        .bind(&password_hash)
        .bind(new.role)
        .bind(new.current_class)
        .bind(&new.school_name)
        .bind(true)
        .bind(false)
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                GuardError::Conflict("An account with this email already exists".to_string())
            }
            other => GuardError::Database(other),
        })?;

        let id = result.last_insert_rowid();
        tracing::debug!(account_id = id, "Account row inserted");

        Ok(Account {
            id,
            email,
            name: new.name,
            password_hash,
            role: new.role,
            current_class: new.current_class,
            school_name: new.school_name,
            is_active: true,
            email_verified: false,
            created_at: now,
            last_login: None,
            failed_login_count: 0,
            locked_until: None,
        })
    }

    /// Look up an account by email, case-insensitively
    pub async fn get_by_email(&self, email: &str) -> GuardResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM account WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.db)
            .await?;

        Ok(account)
    }

    pub async fn get_by_id(&self, id: i64) -> GuardResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM account WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(account)
    }

    /// Resolve a token subject to an account
    pub async fn get_by_subject(&self, subject: &str) -> GuardResult<Option<Account>> {
        match subject.parse::<i64>() {
            Ok(id) => self.get_by_id(id).await,
            Err(_) => Ok(None),
        }
    }

    pub async fn email_exists(&self, email: &str) -> GuardResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ?1")
            .bind(email.trim().to_lowercase())
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Compare a password against the stored hash on the blocking pool
    pub async fn verify_password(&self, account: &Account, password: &str) -> GuardResult<bool> {
        let password_hash = account.password_hash.clone();
        let password = password.to_string();

        task::spawn_blocking(move || {
            let parsed_hash = PasswordHash::new(&password_hash)
                .map_err(|e| GuardError::Internal(format!("Invalid password hash format: {}", e)))?;

            Ok::<bool, GuardError>(
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed_hash)
                    .is_ok(),
            )
        })
        .await
        .map_err(|e| GuardError::Internal(format!("Password verification task failed: {}", e)))?
    }

    pub async fn update_last_login(&self, account_id: i64, at: DateTime<Utc>) -> GuardResult<()> {
        sqlx::query("UPDATE account SET last_login = ?1 WHERE id = ?2")
            .bind(at)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    #[cfg(test)]
    pub async fn set_active(&self, account_id: i64, active: bool) -> GuardResult<()> {
        let result = sqlx::query("UPDATE account SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GuardError::NotFound(format!("account {}", account_id)));
        }

        Ok(())
    }
}

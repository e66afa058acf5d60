/// Session store
///
/// One row per issued refresh token. Sessions are only deactivated by explicit
/// invalidation and only deleted by the expiry sweep; a refresh token is
/// accepted while its session is active and unexpired.
use crate::{
    db::account::Session,
    error::{GuardError, GuardResult},
    metrics,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// Session store backed by the account database
pub struct SessionStore {
    db: SqlitePool,
}

impl SessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Persist a session for a freshly issued refresh token
    pub async fn create(
        &self,
        account_id: i64,
        refresh_token: &str,
        device_info: &str,
        ip_address: &str,
        expires_at: DateTime<Utc>,
    ) -> GuardResult<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            account_id,
            refresh_token: refresh_token.to_string(),
            device_info: device_info.to_string(),
            ip_address: ip_address.to_string(),
            created_at: Utc::now(),
            expires_at,
            is_active: true,
        };

        sqlx::query(
            "INSERT INTO session (id, account_id, refresh_token, device_info, ip_address, created_at, expires_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        )
        .bind(&session.id)
        .bind(session.account_id)
        .bind(&session.refresh_token)
        .bind(&session.device_info)
        .bind(&session.ip_address)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.is_active)
        .execute(&self.db)
        .await?;

        tracing::debug!(session_id = %session.id, account_id, "Session created");

        Ok(session)
    }

    pub async fn find_by_refresh_token(&self, refresh_token: &str) -> GuardResult<Option<Session>> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM session WHERE refresh_token = ?1")
            .bind(refresh_token)
            .fetch_optional(&self.db)
            .await?;

        Ok(session)
    }

    /// Session for `refresh_token` if it may still be used at `now`
    pub async fn validate_refresh_token(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Session> {
        match self.find_by_refresh_token(refresh_token).await? {
            Some(session) if session.is_usable_at(now) => Ok(session),
            Some(session) => {
                tracing::debug!(
                    session_id = %session.id,
                    is_active = session.is_active,
                    "Refresh token presented for unusable session"
                );
                Err(GuardError::Authentication("Invalid or expired refresh token".to_string()))
            }
            None => Err(GuardError::Authentication("Invalid or expired refresh token".to_string())),
        }
    }

    /// Deactivate one session; returns whether it was active
    pub async fn invalidate(&self, session_id: &str) -> GuardResult<bool> {
        let result = sqlx::query("UPDATE session SET is_active = 0 WHERE id = ?1 AND is_active = 1")
            .bind(session_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every session of an account; returns how many were active
    pub async fn invalidate_all_for_user(&self, account_id: i64) -> GuardResult<u64> {
        let result = sqlx::query("UPDATE session SET is_active = 0 WHERE account_id = ?1 AND is_active = 1")
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete sessions that expired before `now`
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> GuardResult<u64> {
        let result = sqlx::query("DELETE FROM session WHERE expires_at < ?1")
            .bind(now)
            .execute(&self.db)
            .await?;

        let sessions_deleted = result.rows_affected();
        if sessions_deleted > 0 {
            metrics::record_sessions_swept(sessions_deleted);
            tracing::info!(sessions_deleted, "Cleaned up expired sessions");
        } else {
            tracing::debug!("Session cleanup: no expired sessions found");
        }

        Ok(sessions_deleted)
    }

    #[cfg(test)]
    pub async fn active_count_for_user(&self, account_id: i64) -> GuardResult<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM session WHERE account_id = ?1 AND is_active = 1")
            .bind(account_id)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, NewAccount},
        db::{account::Role, create_memory_pool, run_migrations},
    };
    use chrono::Duration;

    async fn setup() -> (SessionStore, i64) {
        let db = create_memory_pool().await.unwrap();
        run_migrations(&db).await.unwrap();

        let account = AccountManager::new(db.clone())
            .create_account(NewAccount {
                email: "ada@x.com".to_string(),
                name: "Ada".to_string(),
                password: "Str0ng!Pass".to_string(),
                role: Role::Student,
                current_class: None,
                school_name: None,
            })
            .await
            .unwrap();

        (SessionStore::new(db), account.id)
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (store, account_id) = setup().await;
        let now = Utc::now();

        let session = store
            .create(account_id, "refresh-1", "fp", "10.0.0.1", now + Duration::days(7))
            .await
            .unwrap();
        assert!(session.is_active);

        let found = store.validate_refresh_token("refresh-1", now).await.unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found.ip_address, "10.0.0.1");

        assert!(store.validate_refresh_token("unknown", now).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_rejected_without_sweep() {
        let (store, account_id) = setup().await;
        let now = Utc::now();

        store
            .create(account_id, "refresh-1", "fp", "10.0.0.1", now + Duration::days(7))
            .await
            .unwrap();

        let later = now + Duration::days(8);
        assert!(matches!(
            store.validate_refresh_token("refresh-1", later).await,
            Err(GuardError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_is_idempotent() {
        let (store, account_id) = setup().await;
        let now = Utc::now();
        let session = store
            .create(account_id, "refresh-1", "fp", "ip", now + Duration::days(7))
            .await
            .unwrap();

        assert!(store.invalidate(&session.id).await.unwrap());
        assert!(!store.invalidate(&session.id).await.unwrap());
        assert!(!store.invalidate("no-such-session").await.unwrap());
        assert!(store.validate_refresh_token("refresh-1", now).await.is_err());
    }

    #[tokio::test]
    async fn test_invalidate_all_for_user() {
        let (store, account_id) = setup().await;
        let expires = Utc::now() + Duration::days(7);

        for n in 0..3 {
            store
                .create(account_id, &format!("refresh-{}", n), "fp", "ip", expires)
                .await
                .unwrap();
        }
        assert_eq!(store.active_count_for_user(account_id).await.unwrap(), 3);

        assert_eq!(store.invalidate_all_for_user(account_id).await.unwrap(), 3);
        assert_eq!(store.invalidate_all_for_user(account_id).await.unwrap(), 0);
        assert_eq!(store.active_count_for_user(account_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (store, account_id) = setup().await;
        let now = Utc::now();

        store
            .create(account_id, "old", "fp", "ip", now - Duration::hours(1))
            .await
            .unwrap();
        store
            .create(account_id, "fresh", "fp", "ip", now + Duration::days(1))
            .await
            .unwrap();

        assert_eq!(store.sweep_expired(now).await.unwrap(), 1);
        assert!(store.find_by_refresh_token("old").await.unwrap().is_none());
        assert!(store.find_by_refresh_token("fresh").await.unwrap().is_some());
    }
}

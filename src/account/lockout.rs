/// Failed-login tracking and temporary account lockout
///
/// The counter and lock expiry live on the account row. Expiry is evaluated
/// lazily whenever the state is read; nothing sweeps locks in the background.
use crate::{error::GuardResult, metrics};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tokio::sync::Mutex;

/// Lock state of one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked { failed_attempts: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockState {
    pub fn from_record(failed_login_count: i64, locked_until: Option<DateTime<Utc>>) -> Self {
        match locked_until {
            Some(until) => LockState::Locked { until },
            None => LockState::Unlocked {
                failed_attempts: u32::try_from(failed_login_count.max(0)).unwrap_or(u32::MAX),
            },
        }
    }

    /// Release a lock whose expiry has passed
    pub fn resolve(self, now: DateTime<Utc>) -> Self {
        match self {
            LockState::Locked { until } if now >= until => LockState::Unlocked { failed_attempts: 0 },
            other => other,
        }
    }

    /// State after one more failed attempt
    pub fn after_failure(self, now: DateTime<Utc>, threshold: u32, lock_for: Duration) -> Self {
        match self.resolve(now) {
            LockState::Unlocked { failed_attempts } => {
                let failed_attempts = failed_attempts.saturating_add(1);
                if failed_attempts >= threshold {
                    LockState::Locked { until: now + lock_for }
                } else {
                    LockState::Unlocked { failed_attempts }
                }
            }
            locked => locked,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }

    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            LockState::Locked { until } => Some(*until),
            LockState::Unlocked { .. } => None,
        }
    }
}

/// Persists lock transitions, one at a time
pub struct LockTracker {
    db: SqlitePool,
    threshold: u32,
    lock_for: Duration,
    transition: Mutex<()>,
}

impl LockTracker {
    pub fn new(db: SqlitePool, threshold: u32, lock_for: Duration) -> Self {
        Self {
            db,
            threshold,
            lock_for,
            transition: Mutex::new(()),
        }
    }

    /// Current state for `email`; an expired lock is cleared on the way out
    ///
    /// Unknown emails report as unlocked.
    pub async fn check(&self, email: &str, now: DateTime<Utc>) -> GuardResult<LockState> {
        let _guard = self.transition.lock().await;

        let Some(stored) = self.load(email).await? else {
            return Ok(LockState::Unlocked { failed_attempts: 0 });
        };

        let resolved = stored.resolve(now);
        if resolved != stored {
            self.store(email, resolved).await?;
            tracing::info!(email = %email, "Account lock expired");
        }

        Ok(resolved)
    }

    /// Count a failed attempt; `None` when no such account exists
    pub async fn record_failure(&self, email: &str, now: DateTime<Utc>) -> GuardResult<Option<LockState>> {
        let _guard = self.transition.lock().await;

        let Some(stored) = self.load(email).await? else {
            return Ok(None);
        };

        let next = stored.after_failure(now, self.threshold, self.lock_for);
        self.store(email, next).await?;

        if let LockState::Locked { until } = next {
            if !stored.resolve(now).is_locked() {
                metrics::record_lockout();
                tracing::warn!(email = %email, locked_until = %until, "Account locked after repeated failed logins");
            }
        }

        Ok(Some(next))
    }

    /// Clear the counter after a successful login
    pub async fn record_success(&self, account_id: i64) -> GuardResult<()> {
        let _guard = self.transition.lock().await;

        sqlx::query("UPDATE account SET failed_login_count = 0, locked_until = NULL WHERE id = ?1")
            .bind(account_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn load(&self, email: &str) -> GuardResult<Option<LockState>> {
        let row: Option<(i64, Option<DateTime<Utc>>)> =
            sqlx::query_as("SELECT failed_login_count, locked_until FROM account WHERE email = ?1")
                .bind(email.trim().to_lowercase())
                .fetch_optional(&self.db)
                .await?;

        Ok(row.map(|(count, until)| LockState::from_record(count, until)))
    }

    async fn store(&self, email: &str, state: LockState) -> GuardResult<()> {
        let (count, until) = match state {
            LockState::Unlocked { failed_attempts } => (i64::from(failed_attempts), None),
            LockState::Locked { until } => (i64::from(self.threshold), Some(until)),
        };

        sqlx::query("UPDATE account SET failed_login_count = ?1, locked_until = ?2 WHERE email = ?3")
            .bind(count)
            .bind(until)
            .bind(email.trim().to_lowercase())
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        account::{AccountManager, NewAccount},
        db::{account::Role, create_memory_pool, run_migrations},
    };

    async fn setup() -> (LockTracker, AccountManager, i64) {
        let db = create_memory_pool().await.unwrap();
        run_migrations(&db).await.unwrap();

        let accounts = AccountManager::new(db.clone());
        let account = accounts
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

        (LockTracker::new(db, 5, Duration::minutes(15)), accounts, account.id)
    }

    #[test]
    fn test_state_machine() {
        let now = Utc::now();
        let lock_for = Duration::minutes(15);

        let mut state = LockState::Unlocked { failed_attempts: 0 };
        for _ in 0..4 {
            state = state.after_failure(now, 5, lock_for);
        }
        assert_eq!(state, LockState::Unlocked { failed_attempts: 4 });

        state = state.after_failure(now, 5, lock_for);
        assert_eq!(state, LockState::Locked { until: now + lock_for });

        assert!(state.resolve(now + Duration::minutes(14)).is_locked());
        assert_eq!(
            state.resolve(now + lock_for),
            LockState::Unlocked { failed_attempts: 0 }
        );
    }

    #[test]
    fn test_failure_while_locked_does_not_extend() {
        let now = Utc::now();
        let locked = LockState::Locked { until: now + Duration::minutes(10) };
        assert_eq!(locked.after_failure(now, 5, Duration::minutes(15)), locked);
    }

    #[tokio::test]
    async fn test_fifth_failure_locks() {
        let (tracker, _, _) = setup().await;
        let now = Utc::now();

        for attempt in 1..=4 {
            let state = tracker.record_failure("ada@x.com", now).await.unwrap().unwrap();
            assert_eq!(state, LockState::Unlocked { failed_attempts: attempt });
        }
        assert!(!tracker.check("ada@x.com", now).await.unwrap().is_locked());

        let state = tracker.record_failure("ADA@x.com", now).await.unwrap().unwrap();
        assert!(state.is_locked());
        assert!(tracker.check("ada@x.com", now).await.unwrap().is_locked());
    }

    #[tokio::test]
    async fn test_lock_expires_lazily_with_counter_reset() {
        let (tracker, accounts, _) = setup().await;
        let locked_at = Utc::now();

        for _ in 0..5 {
            tracker.record_failure("ada@x.com", locked_at).await.unwrap();
        }

        let later = locked_at + Duration::minutes(15) + Duration::milliseconds(1);
        let state = tracker.check("ada@x.com", later).await.unwrap();
        assert_eq!(state, LockState::Unlocked { failed_attempts: 0 });

        let account = accounts.get_by_email("ada@x.com").await.unwrap().unwrap();
        assert_eq!(account.failed_login_count, 0);
        assert!(account.locked_until.is_none());
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let (tracker, _, account_id) = setup().await;
        let now = Utc::now();

        for _ in 0..4 {
            tracker.record_failure("ada@x.com", now).await.unwrap();
        }
        tracker.record_success(account_id).await.unwrap();

        // Pre-reset failures do not count toward the next lock
        for _ in 0..4 {
            tracker.record_failure("ada@x.com", now).await.unwrap();
        }
        assert!(!tracker.check("ada@x.com", now).await.unwrap().is_locked());

        let state = tracker.record_failure("ada@x.com", now).await.unwrap().unwrap();
        assert!(state.is_locked());
    }

    #[tokio::test]
    async fn test_unknown_email_is_a_no_op() {
        let (tracker, _, _) = setup().await;
        let now = Utc::now();

        assert!(tracker.record_failure("ghost@x.com", now).await.unwrap().is_none());
        assert!(!tracker.check("ghost@x.com", now).await.unwrap().is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_lock_exactly_once() {
        let (tracker, accounts, _) = setup().await;
        let tracker = std::sync::Arc::new(tracker);
        let now = Utc::now();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..12 {
            let tracker = std::sync::Arc::clone(&tracker);
            tasks.spawn(async move { tracker.record_failure("ada@x.com", now).await.unwrap().unwrap() });
        }

        let mut unlocked_counts = Vec::new();
        let mut locked = 0;
        while let Some(state) = tasks.join_next().await {
            match state.unwrap() {
                LockState::Unlocked { failed_attempts } => unlocked_counts.push(failed_attempts),
                LockState::Locked { until } => {
                    let drift = until - (now + Duration::minutes(15));
                    assert!(drift.num_seconds().abs() < 1);
                    locked += 1;
                }
            }
        }

        // Every increment is seen by exactly one caller
        unlocked_counts.sort_unstable();
        assert_eq!(unlocked_counts, vec![1, 2, 3, 4]);
        assert_eq!(locked, 8);

        let account = accounts.get_by_email("ada@x.com").await.unwrap().unwrap();
        assert_eq!(account.failed_login_count, 5);
        assert!(account.locked_until.is_some());
    }
}

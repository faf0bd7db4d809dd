//! Per-environment deployment locks.
//!
//! State machine per (repository, environment) key:
//!
//! ```text
//! Unlocked ──lock──────────────► Locked(holder)
//! Locked(h) ──lock by h────────► Locked(h)        reported AlreadyHeld
//! Locked(h) ──lock by other────► Locked(h)        reported HeldByOther
//! Locked(h) ──lock steal───────► Locked(other)    reported Stolen
//! Locked(h) ──unlock by h──────► Unlocked
//! Locked(h) ──unlock by other──► Locked(h)        reported HeldByOther
//! ```
//!
//! There is no steal-on-unlock path. Transitions run inside a single
//! `DeployDb::lock_update` transaction, so concurrent callers on one key
//! serialize and never observe stale state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DeployDb;
use crate::error::Result;
use crate::types::{RepoName, UserId};

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    pub holder: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub locked_at: DateTime<Utc>,
}

impl Lock {
    pub fn new(holder: UserId, message: Option<String>) -> Self {
        Lock {
            holder,
            message,
            locked_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// LockOutcome
// ---------------------------------------------------------------------------

/// What a lock attempt did. `AlreadyHeld` is distinct from `Acquired`;
/// a steal always names the previous holder.
#[derive(Debug, Clone, PartialEq)]
pub enum LockOutcome {
    Acquired,
    AlreadyHeld,
    Stolen { previous: Lock },
    HeldByOther { lock: Lock },
}

/// What an unlock attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum UnlockOutcome {
    Released,
    NotLocked,
    HeldByOther { lock: Lock },
}

// ---------------------------------------------------------------------------
// LockManager
// ---------------------------------------------------------------------------

pub struct LockManager<'a> {
    db: &'a DeployDb,
}

impl<'a> LockManager<'a> {
    pub fn new(db: &'a DeployDb) -> Self {
        LockManager { db }
    }

    /// Acquire the lock, or steal it when `steal` is set. Re-locking by the
    /// current holder keeps the existing lock (and its message) untouched.
    pub fn lock(
        &self,
        repo: &RepoName,
        environment: &str,
        actor: &UserId,
        message: Option<String>,
        steal: bool,
    ) -> Result<LockOutcome> {
        self.db.lock_update(repo, environment, |current| match current {
            None => (
                Some(Lock::new(actor.clone(), message)),
                LockOutcome::Acquired,
            ),
            Some(lock) if lock.holder == *actor => (Some(lock), LockOutcome::AlreadyHeld),
            Some(lock) if steal => (
                Some(Lock::new(actor.clone(), message)),
                LockOutcome::Stolen { previous: lock },
            ),
            Some(lock) => {
                let outcome = LockOutcome::HeldByOther { lock: lock.clone() };
                (Some(lock), outcome)
            }
        })
    }

    /// Release the lock. Only the holder may unlock.
    pub fn unlock(
        &self,
        repo: &RepoName,
        environment: &str,
        actor: &UserId,
    ) -> Result<UnlockOutcome> {
        self.db.lock_update(repo, environment, |current| match current {
            None => (None, UnlockOutcome::NotLocked),
            Some(lock) if lock.holder == *actor => (None, UnlockOutcome::Released),
            Some(lock) => {
                let outcome = UnlockOutcome::HeldByOther { lock: lock.clone() };
                (Some(lock), outcome)
            }
        })
    }

    /// Current lock state, `None` when unlocked.
    pub fn status(&self, repo: &RepoName, environment: &str) -> Result<Option<Lock>> {
        self.db.lock_get(repo, environment)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, DeployDb) {
        let dir = TempDir::new().unwrap();
        let db = DeployDb::open(&dir.path().join("locks.db")).unwrap();
        (dir, db)
    }

    fn repo() -> RepoName {
        RepoName::parse("acme-inc/api").unwrap()
    }

    #[test]
    fn acquire_then_relock_is_already_held() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        let david = UserId::new("U1");

        assert_eq!(
            locks.lock(&repo(), "staging", &david, None, false).unwrap(),
            LockOutcome::Acquired
        );
        assert_eq!(
            locks.lock(&repo(), "staging", &david, None, false).unwrap(),
            LockOutcome::AlreadyHeld
        );
        // Still exactly one lock, held by david.
        assert_eq!(locks.status(&repo(), "staging").unwrap().unwrap().holder, david);
    }

    #[test]
    fn relock_by_holder_keeps_original_message() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        let david = UserId::new("U1");

        locks
            .lock(&repo(), "staging", &david, Some("testing".to_string()), false)
            .unwrap();
        locks.lock(&repo(), "staging", &david, None, false).unwrap();

        let lock = locks.status(&repo(), "staging").unwrap().unwrap();
        assert_eq!(lock.message.as_deref(), Some("testing"));
    }

    #[test]
    fn other_actor_is_refused_without_steal() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        let david = UserId::new("U1");
        let steve = UserId::new("U2");

        locks.lock(&repo(), "staging", &david, None, false).unwrap();
        match locks.lock(&repo(), "staging", &steve, None, false).unwrap() {
            LockOutcome::HeldByOther { lock } => assert_eq!(lock.holder, david),
            other => panic!("expected HeldByOther, got {other:?}"),
        }
        assert_eq!(locks.status(&repo(), "staging").unwrap().unwrap().holder, david);
    }

    #[test]
    fn steal_transfers_and_names_previous_holder() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        let david = UserId::new("U1");
        let steve = UserId::new("U2");

        locks.lock(&repo(), "staging", &david, None, false).unwrap();
        match locks.lock(&repo(), "staging", &steve, None, true).unwrap() {
            LockOutcome::Stolen { previous } => assert_eq!(previous.holder, david),
            other => panic!("expected Stolen, got {other:?}"),
        }
        assert_eq!(locks.status(&repo(), "staging").unwrap().unwrap().holder, steve);
    }

    #[test]
    fn unlock_by_non_holder_never_changes_state() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        let david = UserId::new("U1");
        let steve = UserId::new("U2");

        locks.lock(&repo(), "staging", &david, None, false).unwrap();
        match locks.unlock(&repo(), "staging", &steve).unwrap() {
            UnlockOutcome::HeldByOther { lock } => assert_eq!(lock.holder, david),
            other => panic!("expected HeldByOther, got {other:?}"),
        }
        assert_eq!(locks.status(&repo(), "staging").unwrap().unwrap().holder, david);

        assert_eq!(locks.unlock(&repo(), "staging", &david).unwrap(), UnlockOutcome::Released);
        assert!(locks.status(&repo(), "staging").unwrap().is_none());
    }

    #[test]
    fn unlock_when_unlocked_reports_not_locked() {
        let (_dir, db) = fixture();
        let locks = LockManager::new(&db);
        assert_eq!(
            locks.unlock(&repo(), "staging", &UserId::new("U1")).unwrap(),
            UnlockOutcome::NotLocked
        );
    }
}

//! Suspended pipeline continuations.
//!
//! The pipeline cannot block waiting for a button click, so each
//! confirmation point is reified as a `PendingAction`: an unguessable
//! token mapped to the minimal state needed to resume without redoing
//! prior work. `PendingKind` is the closed whitelist of resumable
//! continuations — a stored value outside it is rejected exactly like an
//! unknown token, so arbitrary stored actions can never be resumed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{DeployDb, TokenClaim};
use crate::error::Result;
use crate::types::{CommitId, RepoName, UserId};

// ---------------------------------------------------------------------------
// ConfirmedGate
// ---------------------------------------------------------------------------

/// The deploy gate a confirmation is bound to. On resume, this gate's
/// condition is force-overridden; gates before it are not re-evaluated and
/// gates after it run normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmedGate {
    AutoDeploy,
    StealLock,
    StatusChecks,
}

impl ConfirmedGate {
    /// Position in the pipeline's gate order.
    pub fn index(self) -> u8 {
        match self {
            ConfirmedGate::AutoDeploy => 0,
            ConfirmedGate::StealLock => 1,
            ConfirmedGate::StatusChecks => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingKind {
    /// Resume a suspended deploy with `gate` confirmed. The commit id was
    /// resolved before suspension and is never re-resolved.
    ConfirmDeploy {
        repository: RepoName,
        environment: String,
        git_ref: String,
        commit: CommitId,
        gate: ConfirmedGate,
    },
    /// Steal an environment lock that blocked a `lock` command.
    StealLock {
        repository: RepoName,
        environment: String,
        message: Option<String>,
    },
    /// Post-deploy suggestion: lock the environment just deployed to.
    LockSuggestion {
        repository: RepoName,
        environment: String,
    },
    /// Post-deploy suggestion: unlock after deploying the default ref.
    UnlockSuggestion {
        repository: RepoName,
        environment: String,
    },
}

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub token: Uuid,
    pub kind: PendingKind,
    /// When set, only this identity may resolve the action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(kind: PendingKind, restrict_to: Option<UserId>) -> Self {
        PendingAction {
            token: Uuid::new_v4(),
            kind,
            restrict_to,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// PendingStore
// ---------------------------------------------------------------------------

pub struct PendingStore<'a> {
    db: &'a DeployDb,
}

impl<'a> PendingStore<'a> {
    pub fn new(db: &'a DeployDb) -> Self {
        PendingStore { db }
    }

    /// Persist a new continuation and return it (with its fresh token).
    pub fn create(&self, kind: PendingKind, restrict_to: Option<UserId>) -> Result<PendingAction> {
        let action = PendingAction::new(kind, restrict_to);
        self.db.pending_insert(&action)?;
        Ok(action)
    }

    /// Consume a token, exactly once. A malformed token string is treated
    /// as unknown — the caller learns nothing about why it was rejected.
    pub fn take(&self, token: &str, actor: &UserId) -> Result<TokenClaim> {
        let Ok(token) = Uuid::parse_str(token) else {
            return Ok(TokenClaim::Unknown);
        };
        self.db.pending_take(token, actor)
    }

    /// Drop continuations older than `ttl`.
    pub fn purge_expired(&self, ttl: Duration) -> Result<u32> {
        self.db.pending_purge_expired(ttl, Utc::now())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

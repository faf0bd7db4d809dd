//! Persistent storage for slipway's mutable state, backed by redb.
//!
//! # Table design
//!
//! Three tables, all JSON-valued:
//!
//! - `locks`:    key `owner/name \0 environment` → `Lock`
//! - `pending`:  key 16-byte action token (uuid) → `PendingAction`
//! - `deploys`:  key `owner/name \0 environment` → `DeployRecord`
//!               (the last deployment recorded for that environment)
//!
//! Every logical operation is a single write transaction that re-reads
//! current state before deciding, so concurrent lock/steal/unlock calls on
//! one key and concurrent token resolutions serialize through the storage
//! engine — no lost updates, and a token is consumed at most once.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::{Result, SlipwayError};
use crate::lock::Lock;
use crate::pending::PendingAction;
use crate::types::{CommitId, RepoName, UserId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
const PENDING: TableDefinition<&[u8], &[u8]> = TableDefinition::new("pending");
const DEPLOYS: TableDefinition<&str, &[u8]> = TableDefinition::new("deploys");

fn env_key(repo: &RepoName, environment: &str) -> String {
    format!("{repo}\u{0}{environment}")
}

fn store_err(e: impl std::fmt::Display) -> SlipwayError {
    SlipwayError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// DeployRecord
// ---------------------------------------------------------------------------

/// The last deployment recorded for an environment. Supplies the previous
/// commit id for compare links and "no change" detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub commit: CommitId,
    pub git_ref: String,
    pub deployed_by: UserId,
    pub deployed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Outcome of a token take
// ---------------------------------------------------------------------------

/// Result of attempting to consume a pending-action token.
#[derive(Debug)]
pub enum TokenClaim {
    /// The token existed and is now consumed.
    Taken(PendingAction),
    /// The token exists but is restricted to a different actor. Left
    /// unconsumed so the authorized actor can still resolve it.
    Denied,
    /// No such token (never existed, already consumed, or expired).
    Unknown,
}

// ---------------------------------------------------------------------------
// DeployDb
// ---------------------------------------------------------------------------

/// Single-file store for locks, pending actions and deploy history.
pub struct DeployDb {
    db: Database,
}

impl DeployDb {
    /// Open or create the database at `path`, ensuring all tables exist.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(LOCKS).map_err(store_err)?;
        wt.open_table(PENDING).map_err(store_err)?;
        wt.open_table(DEPLOYS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    // ---------------------------------------------------------------------------
    // Locks
    // ---------------------------------------------------------------------------

    pub fn lock_get(&self, repo: &RepoName, environment: &str) -> Result<Option<Lock>> {
        let key = env_key(repo, environment);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(LOCKS).map_err(store_err)?;
        let raw = match table.get(key.as_str()).map_err(store_err)? {
            Some(guard) => guard.value().to_vec(),
            None => return Ok(None),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Atomically transition the lock on one (repository, environment) key.
    ///
    /// `f` receives the current lock and returns the next lock state plus a
    /// caller-defined summary of what happened. The read, decision and write
    /// share one transaction.
    pub fn lock_update<T>(
        &self,
        repo: &RepoName,
        environment: &str,
        f: impl FnOnce(Option<Lock>) -> (Option<Lock>, T),
    ) -> Result<T> {
        let key = env_key(repo, environment);
        let wt = self.db.begin_write().map_err(store_err)?;
        let outcome = {
            let mut table = wt.open_table(LOCKS).map_err(store_err)?;
            let current = match table.get(key.as_str()).map_err(store_err)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            let (next, outcome) = f(current);
            match next {
                Some(lock) => {
                    let value = serde_json::to_vec(&lock)?;
                    table
                        .insert(key.as_str(), value.as_slice())
                        .map_err(store_err)?;
                }
                None => {
                    table.remove(key.as_str()).map_err(store_err)?;
                }
            }
            outcome
        };
        wt.commit().map_err(store_err)?;
        Ok(outcome)
    }

    // ---------------------------------------------------------------------------
    // Pending actions
    // ---------------------------------------------------------------------------

    pub fn pending_insert(&self, action: &PendingAction) -> Result<()> {
        let value = serde_json::to_vec(action)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            table
                .insert(action.token.as_bytes().as_slice(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Consume a token. Removal and the restriction check share one write
    /// transaction, so a token resolves at most once and a restricted token
    /// is not burned by an unauthorized click.
    ///
    /// A stored value that does not decode as a known resumable kind is
    /// rejected (`ActionNotWhitelisted`) and left in place.
    pub fn pending_take(&self, token: Uuid, actor: &UserId) -> Result<TokenClaim> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let claim = {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            let raw = match table.get(token.as_bytes().as_slice()).map_err(store_err)? {
                Some(guard) => guard.value().to_vec(),
                None => return Ok(TokenClaim::Unknown),
            };
            let action: PendingAction = match serde_json::from_slice(&raw) {
                Ok(action) => action,
                Err(_) => return Err(SlipwayError::ActionNotWhitelisted),
            };
            if let Some(allowed) = &action.restrict_to {
                if allowed != actor {
                    return Ok(TokenClaim::Denied);
                }
            }
            table
                .remove(token.as_bytes().as_slice())
                .map_err(store_err)?;
            TokenClaim::Taken(action)
        };
        wt.commit().map_err(store_err)?;
        Ok(claim)
    }

    /// Delete pending actions older than `ttl`. Returns how many were removed.
    pub fn pending_purge_expired(&self, ttl: Duration, now: DateTime<Utc>) -> Result<u32> {
        let cutoff = now - ttl;
        let wt = self.db.begin_write().map_err(store_err)?;
        let purged = {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            let mut stale: Vec<Vec<u8>> = Vec::new();
            for entry in table.iter().map_err(store_err)? {
                let (k, v) = entry.map_err(store_err)?;
                // Undecodable rows are stale by definition.
                let expired = match serde_json::from_slice::<PendingAction>(v.value()) {
                    Ok(action) => action.created_at < cutoff,
                    Err(_) => true,
                };
                if expired {
                    stale.push(k.value().to_vec());
                }
            }
            for key in &stale {
                table.remove(key.as_slice()).map_err(store_err)?;
            }
            stale.len() as u32
        };
        wt.commit().map_err(store_err)?;
        Ok(purged)
    }

    /// Test seam: store a raw value under a token, bypassing the typed
    /// `PendingAction` encoding.
    #[cfg(test)]
    pub(crate) fn pending_insert_raw(&self, token: Uuid, value: &[u8]) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(PENDING).map_err(store_err)?;
            table
                .insert(token.as_bytes().as_slice(), value)
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    // ---------------------------------------------------------------------------
    // Deploy history
    // ---------------------------------------------------------------------------

    pub fn last_deployed(&self, repo: &RepoName, environment: &str) -> Result<Option<DeployRecord>> {
        let key = env_key(repo, environment);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(DEPLOYS).map_err(store_err)?;
        let raw = match table.get(key.as_str()).map_err(store_err)? {
            Some(guard) => guard.value().to_vec(),
            None => return Ok(None),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    pub fn record_deployed(
        &self,
        repo: &RepoName,
        environment: &str,
        record: &DeployRecord,
    ) -> Result<()> {
        let key = env_key(repo, environment);
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(DEPLOYS).map_err(store_err)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

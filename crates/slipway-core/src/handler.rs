//! The slipway front door.
//!
//! `handle_command` takes raw command text, `handle_action` takes a
//! button-click payload; both return the `Message` the transport should
//! render and never let an error escape. Expected failures render with
//! specific guidance; internal faults render a generic apology and emit
//! `tracing::error!` for out-of-band operator notification.

use tracing::{debug, error, warn};

use crate::command::{self, Intent};
use crate::config::{DeployConfig, Repository};
use crate::db::{DeployDb, TokenClaim};
use crate::error::{Result, SlipwayError};
use crate::github::{AccessGate, DeploymentSink, VersionControl};
use crate::lock::{LockManager, LockOutcome, UnlockOutcome};
use crate::message::Message;
use crate::pending::{PendingAction, PendingKind, PendingStore};
use crate::pipeline::{Pipeline, PipelineOutcome, Prompt, Suspension};
use crate::render;
use crate::types::{Decision, RepoName, RepoToken, User};

// ---------------------------------------------------------------------------
// ActionPayload
// ---------------------------------------------------------------------------

/// A button click relayed by the chat transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPayload {
    pub token: String,
    pub decision: Decision,
}

// ---------------------------------------------------------------------------
// Slipway
// ---------------------------------------------------------------------------

pub struct Slipway<V, A, S> {
    config: DeployConfig,
    db: DeployDb,
    vcs: V,
    access: A,
    sink: S,
}

impl<V, A, S> Slipway<V, A, S>
where
    V: VersionControl,
    A: AccessGate,
    S: DeploymentSink,
{
    pub fn new(config: DeployConfig, db: DeployDb, vcs: V, access: A, sink: S) -> Self {
        Slipway {
            config,
            db,
            vcs,
            access,
            sink,
        }
    }

    pub fn handle_command(&self, actor: &User, text: &str) -> Message {
        match self.run_command(actor, text) {
            Ok(message) => message,
            Err(err) => {
                if err.is_internal() {
                    error!(actor = %actor.id, error = %err, "command failed");
                }
                render::error(&err)
            }
        }
    }

    pub fn handle_action(&self, actor: &User, payload: &ActionPayload) -> Message {
        match self.run_action(actor, payload) {
            Ok(message) => message,
            Err(err) => {
                match &err {
                    SlipwayError::UnknownOrExpiredToken | SlipwayError::ActionNotWhitelisted => {
                        warn!(actor = %actor.id, "rejected action token");
                    }
                    err if err.is_internal() => {
                        error!(actor = %actor.id, error = %err, "action failed");
                    }
                    _ => {}
                }
                render::error(&err)
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------------

    fn run_command(&self, actor: &User, text: &str) -> Result<Message> {
        let intent = command::parse(text)?;
        debug!(actor = %actor.id, ?intent, "handling command");
        match intent {
            Intent::Help => Ok(render::help()),
            Intent::Deploy(deploy) => {
                let pipeline = self.pipeline();
                match pipeline.deploy(actor, &deploy)? {
                    PipelineOutcome::Deployed(deployment) => {
                        Ok(render::deployed(&deployment, &self.vcs))
                    }
                    PipelineOutcome::Suspended(suspension) => Ok(render::suspended(&suspension)),
                }
            }
            Intent::Lock {
                repository,
                environment,
                message,
                force,
            } => self.lock_command(actor, &repository, &environment, message, force),
            Intent::Unlock {
                repository,
                environment,
            } => self.unlock_command(actor, &repository, &environment),
            Intent::Check {
                repository,
                environment,
            } => self.check_command(actor, &repository, &environment),
            Intent::Where { repository } => self.where_command(actor, &repository),
        }
    }

    fn lock_command(
        &self,
        actor: &User,
        repository: &RepoToken,
        environment: &str,
        message: Option<String>,
        force: bool,
    ) -> Result<Message> {
        let repo = self.resolve_repo(actor, repository)?;
        let env = resolve_environment(repo, environment)?;
        let locks = LockManager::new(&self.db);
        match locks.lock(&repo.name, &env, &actor.id, message.clone(), force)? {
            LockOutcome::Acquired => Ok(render::locked(&env, &repo.name)),
            LockOutcome::AlreadyHeld => Ok(render::already_locked(&env)),
            LockOutcome::Stolen { previous } => Ok(render::lock_stolen(&env, &repo.name, &previous)),
            LockOutcome::HeldByOther { lock } => {
                // Anyone may resolve a steal prompt; the lock goes to whoever
                // confirms it.
                let action = PendingStore::new(&self.db).create(
                    PendingKind::StealLock {
                        repository: repo.name.clone(),
                        environment: env.clone(),
                        message,
                    },
                    None,
                )?;
                Ok(render::suspended(&Suspension {
                    token: action.token,
                    prompt: Prompt::StealLock {
                        environment: env,
                        lock,
                    },
                }))
            }
        }
    }

    fn unlock_command(
        &self,
        actor: &User,
        repository: &RepoToken,
        environment: &str,
    ) -> Result<Message> {
        let repo = self.resolve_repo(actor, repository)?;
        let env = resolve_environment(repo, environment)?;
        match LockManager::new(&self.db).unlock(&repo.name, &env, &actor.id)? {
            UnlockOutcome::Released => Ok(render::unlocked(&env, &repo.name)),
            UnlockOutcome::NotLocked => Ok(render::not_locked(&env)),
            UnlockOutcome::HeldByOther { lock } => {
                Ok(Message::plain(render::lock_line(&env, &lock)))
            }
        }
    }

    fn check_command(
        &self,
        actor: &User,
        repository: &RepoToken,
        environment: &str,
    ) -> Result<Message> {
        let repo = self.resolve_repo(actor, repository)?;
        let env = resolve_environment(repo, environment)?;
        let lock = LockManager::new(&self.db).status(&repo.name, &env)?;
        Ok(render::check_status(&repo.name, &env, lock.as_ref()))
    }

    fn where_command(&self, actor: &User, repository: &RepoToken) -> Result<Message> {
        let repo = self.resolve_repo(actor, repository)?;
        let names: Vec<&str> = repo.environments.iter().map(|e| e.name.as_str()).collect();
        Ok(render::environments(&repo.name, &names))
    }

    // ---------------------------------------------------------------------------
    // Actions
    // ---------------------------------------------------------------------------

    fn run_action(&self, actor: &User, payload: &ActionPayload) -> Result<Message> {
        let action = match PendingStore::new(&self.db).take(&payload.token, &actor.id)? {
            TokenClaim::Taken(action) => action,
            // Restricted-to-someone-else and plain unknown render the same.
            TokenClaim::Denied | TokenClaim::Unknown => {
                return Err(SlipwayError::UnknownOrExpiredToken)
            }
        };
        debug!(actor = %actor.id, kind = ?action.kind, decision = ?payload.decision, "resolving pending action");

        if payload.decision == Decision::No {
            return Ok(render::declined(&action.kind));
        }
        self.confirm(actor, action)
    }

    fn confirm(&self, actor: &User, action: PendingAction) -> Result<Message> {
        match action.kind {
            PendingKind::ConfirmDeploy {
                repository,
                environment,
                git_ref,
                commit,
                gate,
            } => {
                let pipeline = self.pipeline();
                match pipeline.resume(actor, &repository, &environment, &git_ref, &commit, gate)? {
                    PipelineOutcome::Deployed(deployment) => {
                        Ok(render::deployed(&deployment, &self.vcs))
                    }
                    PipelineOutcome::Suspended(suspension) => Ok(render::suspended(&suspension)),
                }
            }
            PendingKind::StealLock {
                repository,
                environment,
                message,
            } => {
                self.ensure_access(actor, &repository)?;
                match LockManager::new(&self.db).lock(
                    &repository,
                    &environment,
                    &actor.id,
                    message,
                    true,
                )? {
                    LockOutcome::Stolen { previous } => {
                        Ok(render::lock_stolen(&environment, &repository, &previous))
                    }
                    LockOutcome::Acquired => Ok(render::locked(&environment, &repository)),
                    LockOutcome::AlreadyHeld => Ok(render::already_locked(&environment)),
                    LockOutcome::HeldByOther { lock } => {
                        Ok(Message::plain(render::lock_line(&environment, &lock)))
                    }
                }
            }
            PendingKind::LockSuggestion {
                repository,
                environment,
            } => {
                self.ensure_access(actor, &repository)?;
                match LockManager::new(&self.db).lock(
                    &repository,
                    &environment,
                    &actor.id,
                    None,
                    false,
                )? {
                    LockOutcome::Acquired | LockOutcome::Stolen { .. } => {
                        Ok(render::locked(&environment, &repository))
                    }
                    LockOutcome::AlreadyHeld => Ok(render::already_locked(&environment)),
                    LockOutcome::HeldByOther { lock } => {
                        Ok(Message::plain(render::lock_line(&environment, &lock)))
                    }
                }
            }
            PendingKind::UnlockSuggestion {
                repository,
                environment,
            } => {
                self.ensure_access(actor, &repository)?;
                match LockManager::new(&self.db).unlock(&repository, &environment, &actor.id)? {
                    UnlockOutcome::Released => Ok(render::unlocked(&environment, &repository)),
                    UnlockOutcome::NotLocked => Ok(render::not_locked(&environment)),
                    UnlockOutcome::HeldByOther { lock } => {
                        Ok(Message::plain(render::lock_line(&environment, &lock)))
                    }
                }
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Shared resolution
    // ---------------------------------------------------------------------------

    fn pipeline(&self) -> Pipeline<'_, V, A, S> {
        Pipeline::new(&self.config, &self.db, &self.vcs, &self.access, &self.sink)
    }

    /// Access precedes config resolution for full names, so denial reveals
    /// nothing about repository existence. Bare names have to resolve first.
    fn resolve_repo(&self, actor: &User, token: &RepoToken) -> Result<&Repository> {
        if let RepoToken::Full(name) = token {
            self.ensure_access(actor, name)?;
        }
        let repo = self.config.repository(token)?;
        if matches!(token, RepoToken::Short(_)) {
            self.ensure_access(actor, &repo.name)?;
        }
        Ok(repo)
    }

    fn ensure_access(&self, actor: &User, repo: &RepoName) -> Result<()> {
        if self.access.can_deploy(actor, repo)? {
            Ok(())
        } else {
            Err(SlipwayError::AccessDenied {
                repo: repo.to_string(),
            })
        }
    }
}

/// Canonical environment name for a name-or-alias token.
fn resolve_environment(repo: &Repository, token: &str) -> Result<String> {
    repo.environment(token)
        .map(|env| env.name.clone())
        .ok_or_else(|| SlipwayError::validation("environment name", "unknown environment"))
}

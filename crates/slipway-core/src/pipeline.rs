//! The gated deployment pipeline.
//!
//! Gates run in a fixed order: access → repository/environment resolution
//! → ref resolution → auto-deploy policy → lock → status checks → create.
//! The first failing gate terminates the run. A gate that needs
//! confirmation suspends the run instead: a `PendingAction` is stored and
//! a prompt is returned, leaving no open connection behind. A trailing `!`
//! (`force`) buys out exactly one suspension — the earliest gate that
//! would have asked — and a confirmed "yes" resumes at the bound gate with
//! only that gate overridden; later gates still run.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::command::DeployCommand;
use crate::config::{DeployConfig, Environment, Repository};
use crate::db::{DeployDb, DeployRecord};
use crate::error::{Result, SlipwayError};
use crate::github::{AccessGate, DeploymentSink, VersionControl};
use crate::lock::{Lock, LockManager, LockOutcome};
use crate::pending::{ConfirmedGate, PendingKind, PendingStore};
use crate::types::{CommitId, DeploymentRequest, RepoName, RepoToken, StatusCheck, User};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum PipelineOutcome {
    Deployed(Deployment),
    Suspended(Suspension),
}

/// A completed pipeline run.
#[derive(Debug)]
pub struct Deployment {
    pub request: DeploymentRequest,
    /// True when the new commit equals the previously recorded one.
    pub no_change: bool,
    /// Compare link between previous and new commit, when they differ.
    pub compare_url: Option<String>,
    /// Set when the run force-stole the environment lock on the way through.
    pub stolen_from: Option<Lock>,
    /// Post-deploy lock/unlock suggestion, attached to — not blocking — the
    /// success.
    pub suggestion: Option<Suspension>,
}

/// A stored continuation plus the prompt to show for it.
#[derive(Debug)]
pub struct Suspension {
    pub token: Uuid,
    pub prompt: Prompt,
}

#[derive(Debug)]
pub enum Prompt {
    AutoDeploy {
        repository: RepoName,
        environment: String,
        git_ref: String,
    },
    StealLock {
        environment: String,
        lock: Lock,
    },
    StatusChecks {
        failing: Vec<StatusCheck>,
    },
    LockSuggestion {
        environment: String,
        default_ref: String,
        deployed_ref: String,
    },
    UnlockSuggestion {
        environment: String,
    },
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline<'a, V, A, S> {
    config: &'a DeployConfig,
    db: &'a DeployDb,
    vcs: &'a V,
    access: &'a A,
    sink: &'a S,
}

impl<'a, V, A, S> Pipeline<'a, V, A, S>
where
    V: VersionControl,
    A: AccessGate,
    S: DeploymentSink,
{
    pub fn new(
        config: &'a DeployConfig,
        db: &'a DeployDb,
        vcs: &'a V,
        access: &'a A,
        sink: &'a S,
    ) -> Self {
        Pipeline {
            config,
            db,
            vcs,
            access,
            sink,
        }
    }

    /// Run a fresh deploy command through every gate.
    pub fn deploy(&self, actor: &User, command: &DeployCommand) -> Result<PipelineOutcome> {
        // Access runs before resolution: full names are checked as typed,
        // so a denied user learns nothing about whether the repo exists.
        if let RepoToken::Full(name) = &command.repository {
            self.check_access(actor, name)?;
        }

        let repo = self.config.repository(&command.repository)?;
        if matches!(command.repository, RepoToken::Short(_)) {
            self.check_access(actor, &repo.name)?;
        }
        let environment = repo.resolve_environment(command.environment.as_deref())?;

        let git_ref = command
            .git_ref
            .clone()
            .unwrap_or_else(|| environment.default_ref().to_string());
        let commit = self
            .vcs
            .head_commit(&repo.name, &git_ref)?
            .ok_or_else(|| SlipwayError::RefNotFound {
                git_ref: git_ref.clone(),
                repo: repo.name.to_string(),
            })?;
        debug!(repo = %repo.name, %git_ref, commit = %commit, "resolved deploy target");

        self.run_gates(actor, repo, environment, &git_ref, &commit, command.force, None)
    }

    /// Resume a suspended deploy with one gate confirmed. The stored commit
    /// id is reused; gates before the confirmed one are not re-evaluated.
    /// Access is re-checked because the resuming actor may differ from the
    /// original requester.
    pub fn resume(
        &self,
        actor: &User,
        repository: &RepoName,
        environment: &str,
        git_ref: &str,
        commit: &CommitId,
        gate: ConfirmedGate,
    ) -> Result<PipelineOutcome> {
        self.check_access(actor, repository)?;
        let repo = self
            .config
            .repository(&RepoToken::Full(repository.clone()))?;
        let environment = repo
            .environment(environment)
            .ok_or_else(|| SlipwayError::validation("environment name", "unknown environment"))?;
        self.run_gates(actor, repo, environment, git_ref, commit, false, Some(gate))
    }

    fn check_access(&self, actor: &User, repo: &RepoName) -> Result<()> {
        if self.access.can_deploy(actor, repo)? {
            Ok(())
        } else {
            Err(SlipwayError::AccessDenied {
                repo: repo.to_string(),
            })
        }
    }

    /// Gates 4-8. `resumed` marks the confirmed gate on a resume: gates at
    /// or before it are skipped (the bound gate counts as confirmed).
    #[allow(clippy::too_many_arguments)]
    fn run_gates(
        &self,
        actor: &User,
        repo: &Repository,
        environment: &Environment,
        git_ref: &str,
        commit: &CommitId,
        force: bool,
        resumed: Option<ConfirmedGate>,
    ) -> Result<PipelineOutcome> {
        let mut force = force;
        let pending = PendingStore::new(self.db);
        let runs = |gate: ConfirmedGate| match resumed {
            None => true,
            Some(confirmed) => gate.index() > confirmed.index(),
        };

        // Auto-deploy policy: deploying a ref CI already deploys needs a nod.
        if runs(ConfirmedGate::AutoDeploy)
            && environment.auto_deploy_ref.as_deref() == Some(git_ref)
        {
            if force {
                force = false;
            } else {
                let action = pending.create(
                    PendingKind::ConfirmDeploy {
                        repository: repo.name.clone(),
                        environment: environment.name.clone(),
                        git_ref: git_ref.to_string(),
                        commit: commit.clone(),
                        gate: ConfirmedGate::AutoDeploy,
                    },
                    None,
                )?;
                debug!(repo = %repo.name, environment = %environment.name, "suspended at auto-deploy gate");
                return Ok(PipelineOutcome::Suspended(Suspension {
                    token: action.token,
                    prompt: Prompt::AutoDeploy {
                        repository: repo.name.clone(),
                        environment: environment.name.clone(),
                        git_ref: git_ref.to_string(),
                    },
                }));
            }
        }

        // Lock gate.
        let mut stolen_from = None;
        if runs(ConfirmedGate::StealLock) || resumed == Some(ConfirmedGate::StealLock) {
            let held_by_other = match self.db.lock_get(&repo.name, &environment.name)? {
                Some(lock) if lock.holder != actor.id => Some(lock),
                _ => None,
            };
            if let Some(lock) = held_by_other {
                let confirmed = resumed == Some(ConfirmedGate::StealLock);
                if confirmed || force {
                    if !confirmed {
                        force = false;
                    }
                    match LockManager::new(self.db).lock(
                        &repo.name,
                        &environment.name,
                        &actor.id,
                        None,
                        true,
                    )? {
                        LockOutcome::Stolen { previous } => stolen_from = Some(previous),
                        // The holder released it between the read and the
                        // steal; nothing was taken from anyone.
                        _ => {}
                    }
                } else {
                    let action = pending.create(
                        PendingKind::ConfirmDeploy {
                            repository: repo.name.clone(),
                            environment: environment.name.clone(),
                            git_ref: git_ref.to_string(),
                            commit: commit.clone(),
                            gate: ConfirmedGate::StealLock,
                        },
                        None,
                    )?;
                    debug!(repo = %repo.name, environment = %environment.name, "suspended at lock gate");
                    return Ok(PipelineOutcome::Suspended(Suspension {
                        token: action.token,
                        prompt: Prompt::StealLock {
                            environment: environment.name.clone(),
                            lock,
                        },
                    }));
                }
            }
        }

        // Status checks: any non-success context needs a nod.
        if runs(ConfirmedGate::StatusChecks) {
            let failing: Vec<StatusCheck> = self
                .vcs
                .combined_status(&repo.name, commit)?
                .into_iter()
                .filter(|check| !check.state.is_passing())
                .collect();
            if !failing.is_empty() {
                if force {
                    force = false;
                } else {
                    let action = pending.create(
                        PendingKind::ConfirmDeploy {
                            repository: repo.name.clone(),
                            environment: environment.name.clone(),
                            git_ref: git_ref.to_string(),
                            commit: commit.clone(),
                            gate: ConfirmedGate::StatusChecks,
                        },
                        None,
                    )?;
                    debug!(repo = %repo.name, commit = %commit, "suspended at status-check gate");
                    return Ok(PipelineOutcome::Suspended(Suspension {
                        token: action.token,
                        prompt: Prompt::StatusChecks { failing },
                    }));
                }
            }
        }
        let _ = force;

        // Create the deployment request.
        let previous = self.db.last_deployed(&repo.name, &environment.name)?;
        let previous_commit = previous.as_ref().map(|record| record.commit.clone());
        let request = DeploymentRequest {
            requester: actor.id.clone(),
            repository: repo.name.clone(),
            git_ref: git_ref.to_string(),
            commit: commit.clone(),
            environment: environment.name.clone(),
            previous_commit: previous_commit.clone(),
        };
        self.sink.create(&request)?;
        self.db.record_deployed(
            &repo.name,
            &environment.name,
            &DeployRecord {
                commit: commit.clone(),
                git_ref: git_ref.to_string(),
                deployed_by: actor.id.clone(),
                deployed_at: Utc::now(),
            },
        )?;
        info!(repo = %repo.name, environment = %environment.name, %git_ref, commit = %commit, "created deployment request");

        let no_change = previous_commit.as_ref() == Some(commit);
        let compare_url = previous_commit
            .as_ref()
            .filter(|previous| *previous != commit)
            .map(|previous| self.vcs.compare_url(&repo.name, previous, commit));

        let suggestion = self.post_deploy_suggestion(actor, repo, environment, git_ref, &pending)?;

        Ok(PipelineOutcome::Deployed(Deployment {
            request,
            no_change,
            compare_url,
            stolen_from,
            suggestion,
        }))
    }

    /// Informational lock prompts offered alongside a success, never
    /// blocking it.
    fn post_deploy_suggestion(
        &self,
        actor: &User,
        repo: &Repository,
        environment: &Environment,
        deployed_ref: &str,
        pending: &PendingStore<'_>,
    ) -> Result<Option<Suspension>> {
        let default_ref = environment.default_ref();
        let lock = self.db.lock_get(&repo.name, &environment.name)?;

        if deployed_ref != default_ref && lock.is_none() {
            let action = pending.create(
                PendingKind::LockSuggestion {
                    repository: repo.name.clone(),
                    environment: environment.name.clone(),
                },
                Some(actor.id.clone()),
            )?;
            return Ok(Some(Suspension {
                token: action.token,
                prompt: Prompt::LockSuggestion {
                    environment: environment.name.clone(),
                    default_ref: default_ref.to_string(),
                    deployed_ref: deployed_ref.to_string(),
                },
            }));
        }

        if deployed_ref == default_ref
            && lock.as_ref().is_some_and(|lock| lock.holder == actor.id)
        {
            let action = pending.create(
                PendingKind::UnlockSuggestion {
                    repository: repo.name.clone(),
                    environment: environment.name.clone(),
                },
                Some(actor.id.clone()),
            )?;
            return Ok(Some(Suspension {
                token: action.token,
                prompt: Prompt::UnlockSuggestion {
                    environment: environment.name.clone(),
                },
            }));
        }

        Ok(None)
    }
}

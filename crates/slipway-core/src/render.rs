//! Rendering pipeline outcomes and failures as chat messages.
//!
//! Every expected error kind gets specific, actionable wording. Internal
//! faults — and rejected action tokens, whatever the reason — share one
//! generic apology so nothing structural leaks.

use chrono::Utc;

use crate::command::HELP_USAGE;
use crate::error::SlipwayError;
use crate::github::VersionControl;
use crate::lock::Lock;
use crate::message::{
    format_age, Attachment, AttachmentField, Message, COLOR_DANGER, COLOR_INFO,
};
use crate::pending::{ConfirmedGate, PendingKind};
use crate::pipeline::{Deployment, Prompt, Suspension};
use crate::types::RepoName;

pub const GENERIC_ERROR: &str = "Oops! We had a problem running your command, but we've been notified";

// ---------------------------------------------------------------------------
// Help / unknown command
// ---------------------------------------------------------------------------

pub fn help() -> Message {
    Message::plain(HELP_USAGE)
}

pub fn unknown_command() -> Message {
    Message::plain(format!(
        "I don't know that command. Here's what I do know:\n{HELP_USAGE}"
    ))
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

pub fn deployed(deployment: &Deployment, vcs: &impl VersionControl) -> Message {
    let request = &deployment.request;
    let repo_link = format!(
        "<{}|{}>",
        vcs.repo_url(&request.repository),
        request.repository
    );
    let ref_link = format!(
        "<{}|{}>",
        vcs.commit_url(&request.repository, &request.commit),
        request.git_ref
    );
    // First deploys have no previous commit: no "(no change)", no diff.
    let change = if deployment.no_change {
        Some("no change".to_string())
    } else {
        deployment
            .compare_url
            .as_ref()
            .map(|url| format!("<{url}|diff>"))
    };
    let mut text = format!(
        "Created deployment request for {repo_link}@{ref_link} to *{}*",
        request.environment
    );
    if let Some(change) = change {
        text.push_str(&format!(" ({change})"));
    }

    let mut attachments = Vec::new();
    if let Some(previous) = &deployment.stolen_from {
        attachments.push(Attachment::note(
            "Lock stolen",
            format!(
                "The lock on *{}* was stolen from {}.",
                request.environment,
                previous.holder.mention()
            ),
            COLOR_INFO,
        ));
    }
    if let Some(suggestion) = &deployment.suggestion {
        attachments.push(prompt_attachment(suggestion));
    }
    Message { text, attachments }
}

/// Render a suspension: the prompt body becomes the message text, the
/// confirmation buttons ride in the attachment.
pub fn suspended(suspension: &Suspension) -> Message {
    let text = match &suspension.prompt {
        Prompt::AutoDeploy {
            repository,
            environment,
            git_ref,
        } => format!(
            "{repository} is configured to automatically deploy `{git_ref}` to *{environment}*."
        ),
        Prompt::StealLock { environment, lock } => lock_line(environment, lock),
        Prompt::StatusChecks { failing } => {
            let mut lines = vec!["The following commit status checks are not passing:".to_string()];
            for check in failing {
                lines.push(format!("* *{}* [{}]", check.context, check.state));
            }
            lines.join("\n")
        }
        // Suggestions are attached to a success message, not shown alone.
        Prompt::LockSuggestion { .. } | Prompt::UnlockSuggestion { .. } => String::new(),
    };
    Message::with_attachment(text, prompt_attachment(suspension))
}

fn prompt_attachment(suspension: &Suspension) -> Attachment {
    match &suspension.prompt {
        Prompt::AutoDeploy { .. } => {
            Attachment::confirmation("Deploy anyway?", None, suspension.token)
        }
        Prompt::StealLock { .. } => {
            Attachment::confirmation("Steal the lock?", None, suspension.token)
        }
        Prompt::StatusChecks { .. } => Attachment::confirmation(
            "Ignore status checks and deploy anyway?",
            None,
            suspension.token,
        ),
        Prompt::LockSuggestion {
            environment,
            default_ref,
            deployed_ref,
        } => Attachment::confirmation(
            format!("Lock {environment}?"),
            Some(format!(
                "The default ref for *{environment}* is `{default_ref}`, but you deployed `{deployed_ref}`."
            )),
            suspension.token,
        ),
        Prompt::UnlockSuggestion { environment } => Attachment::confirmation(
            format!("Unlock {environment}?"),
            Some(format!(
                "You just deployed the default ref for *{environment}*. Do you want to unlock it?"
            )),
            suspension.token,
        ),
    }
}

// ---------------------------------------------------------------------------
// Locks
// ---------------------------------------------------------------------------

pub fn locked(environment: &str, repo: &RepoName) -> Message {
    Message::plain(format!("Locked *{environment}* on {repo}"))
}

pub fn already_locked(environment: &str) -> Message {
    Message::plain(format!("*{environment}* is already locked"))
}

pub fn lock_stolen(environment: &str, repo: &RepoName, previous: &Lock) -> Message {
    Message::plain(format!(
        "Locked *{environment}* on {repo} (stolen from {})",
        previous.holder.mention()
    ))
}

pub fn unlocked(environment: &str, repo: &RepoName) -> Message {
    Message::plain(format!("Unlocked *{environment}* on {repo}"))
}

pub fn not_locked(environment: &str) -> Message {
    Message::plain(format!("*{environment}* isn't locked."))
}

/// The "*env* was locked by <@X> N minutes ago." line, with the lock
/// message quoted underneath when present.
pub fn lock_line(environment: &str, lock: &Lock) -> String {
    let mut line = format!(
        "*{environment}* was locked by {} {}.",
        lock.holder.mention(),
        format_age(lock.locked_at, Utc::now())
    );
    if let Some(message) = &lock.message {
        line.push_str(&format!("\n> {message}"));
    }
    line
}

pub fn check_status(repo: &RepoName, environment: &str, lock: Option<&Lock>) -> Message {
    let attachment = match lock {
        Some(lock) => Attachment::note("Lock Status", lock_line(environment, lock), COLOR_DANGER),
        None => Attachment::note(
            "Lock Status",
            format!("*{environment}* isn't locked."),
            COLOR_INFO,
        ),
    };
    Message::with_attachment(format!("{repo} (*{environment}*)"), attachment)
}

pub fn environments(repo: &RepoName, names: &[&str]) -> Message {
    if names.is_empty() {
        return Message::plain(format!("I don't know about any environments for {repo}"));
    }
    let mut lines = vec![format!("I know about these environments for {repo}:")];
    for name in names {
        lines.push(format!("* {name}"));
    }
    Message::plain(lines.join("\n"))
}

// ---------------------------------------------------------------------------
// Declined confirmations
// ---------------------------------------------------------------------------

pub fn declined(kind: &PendingKind) -> Message {
    match kind {
        PendingKind::ConfirmDeploy { gate, .. } => match gate {
            ConfirmedGate::StealLock => Message::plain("Did not steal lock."),
            ConfirmedGate::AutoDeploy | ConfirmedGate::StatusChecks => {
                Message::plain("Did not deploy.")
            }
        },
        PendingKind::StealLock { .. } => Message::plain("Did not steal lock."),
        PendingKind::LockSuggestion { environment, .. } => {
            Message::plain(format!("Did not lock *{environment}*."))
        }
        PendingKind::UnlockSuggestion { environment, .. } => {
            Message::plain(format!("Did not unlock *{environment}*."))
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub fn error(err: &SlipwayError) -> Message {
    match err {
        SlipwayError::Validation { field, message } => Message::with_attachment(
            "Oops! We had a problem running that command for you.",
            Attachment::error_fields(vec![AttachmentField {
                title: field.clone(),
                value: message.clone(),
            }]),
        ),
        SlipwayError::UnknownCommand => unknown_command(),
        SlipwayError::AccessDenied { repo } => Message::plain(format!(
            "Sorry, but it looks like you don't have access to {repo}"
        )),
        SlipwayError::RepositoryNotFound(name) => {
            Message::plain(format!("I don't know about the repository {name}"))
        }
        SlipwayError::RefNotFound { git_ref, repo } => {
            Message::plain(format!("The ref `{git_ref}` was not found in {repo}"))
        }
        SlipwayError::LockHeldByOther { environment, lock } => {
            Message::plain(lock_line(environment, lock))
        }
        // Token rejections and unexpected faults are deliberately
        // indistinguishable to the user.
        SlipwayError::UnknownOrExpiredToken
        | SlipwayError::ActionNotWhitelisted
        | SlipwayError::Storage(_)
        | SlipwayError::Io(_)
        | SlipwayError::Yaml(_)
        | SlipwayError::Json(_)
        | SlipwayError::Http(_) => Message::plain(GENERIC_ERROR),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

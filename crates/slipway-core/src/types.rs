use crate::error::SlipwayError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// UserId / User
// ---------------------------------------------------------------------------

/// Opaque chat identity (e.g. a Slack user id like `U012AB1AB`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Chat mention markup for this identity.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An acting identity: the chat id plus the VCS login it is linked to.
/// The login is what access checks run against; mentions use the chat id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl User {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        User {
            id: UserId::new(id),
            username: username.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RepoName
// ---------------------------------------------------------------------------

/// A validated `owner/name` repository name.
///
/// Both segments are limited to `[A-Za-z0-9_.-]`. Serialized as the plain
/// `owner/name` string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName {
    owner: String,
    name: String,
}

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl RepoName {
    pub fn parse(s: &str) -> Result<Self, SlipwayError> {
        let invalid = || SlipwayError::validation("repository name", "not a valid GitHub repository");
        let (owner, name) = s.split_once('/').ok_or_else(invalid)?;
        if !valid_segment(owner) || !valid_segment(name) {
            return Err(invalid());
        }
        Ok(RepoName {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl std::str::FromStr for RepoName {
    type Err = SlipwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepoName::parse(s)
    }
}

impl TryFrom<String> for RepoName {
    type Error = SlipwayError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RepoName::parse(&s)
    }
}

impl From<RepoName> for String {
    fn from(r: RepoName) -> String {
        r.to_string()
    }
}

// ---------------------------------------------------------------------------
// RepoToken
// ---------------------------------------------------------------------------

/// A repository reference as typed in a command: either a full `owner/name`
/// or a bare name that must match exactly one configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoToken {
    Full(RepoName),
    Short(String),
}

impl RepoToken {
    pub fn parse(s: &str) -> Result<Self, SlipwayError> {
        if s.contains('/') {
            return Ok(RepoToken::Full(RepoName::parse(s)?));
        }
        if !valid_segment(s) {
            return Err(SlipwayError::validation(
                "repository name",
                "not a valid GitHub repository",
            ));
        }
        Ok(RepoToken::Short(s.to_string()))
    }
}

impl fmt::Display for RepoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoToken::Full(name) => name.fmt(f),
            RepoToken::Short(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// CommitId
// ---------------------------------------------------------------------------

/// A resolved commit id (full hex sha).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn new(sha: impl Into<String>) -> Self {
        CommitId(sha.into())
    }

    /// The 7-character abbreviation used in compare links.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Commit status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Success,
    Pending,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Success => "success",
            StatusState::Pending => "pending",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }

    pub fn is_passing(self) -> bool {
        matches!(self, StatusState::Success)
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One commit status context (e.g. `ci`) and its current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCheck {
    pub context: String,
    pub state: StatusState,
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// The user's answer on a confirmation button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Yes,
    No,
}

impl std::str::FromStr for Decision {
    type Err = SlipwayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Decision::Yes),
            "no" => Ok(Decision::No),
            _ => Err(SlipwayError::validation("decision", "must be yes or no")),
        }
    }
}

// ---------------------------------------------------------------------------
// DeploymentRequest
// ---------------------------------------------------------------------------

/// Immutable record of a deployment the pipeline decided to perform.
/// Created only by a successful pipeline run; handed to the
/// `DeploymentSink`, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub requester: UserId,
    pub repository: RepoName,
    pub git_ref: String,
    pub commit: CommitId,
    pub environment: String,
    pub previous_commit: Option<CommitId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

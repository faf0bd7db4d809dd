//! In-memory fakes for the external collaborators, plus a fixture builder.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use slipway_core::config::DeployConfig;
use slipway_core::db::DeployDb;
use slipway_core::error::Result;
use slipway_core::github::{AccessGate, DeploymentSink, VersionControl};
use slipway_core::handler::{ActionPayload, Slipway};
use slipway_core::message::Message;
use slipway_core::types::{
    CommitId, Decision, DeploymentRequest, RepoName, StatusCheck, StatusState, User,
};

// ---------------------------------------------------------------------------
// FakeGitHub
// ---------------------------------------------------------------------------

/// A shared-state stand-in for the GitHub-backed collaborators. Clones
/// share the same underlying state, so one instance can serve as version
/// control, access gate and deployment sink while the test keeps a handle
/// for assertions.
#[derive(Clone, Default)]
pub struct FakeGitHub {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    heads: HashMap<(String, String), CommitId>,
    statuses: HashMap<String, Vec<StatusCheck>>,
    collaborators: HashSet<(String, String)>,
    requests: Vec<DeploymentRequest>,
}

impl FakeGitHub {
    pub fn new() -> Self {
        FakeGitHub::default()
    }

    pub fn set_head(&self, repo: &str, git_ref: &str, sha: &str) {
        self.inner
            .lock()
            .unwrap()
            .heads
            .insert((repo.to_string(), git_ref.to_string()), CommitId::new(sha));
    }

    pub fn set_statuses(&self, sha: &str, checks: &[(&str, StatusState)]) {
        let checks = checks
            .iter()
            .map(|(context, state)| StatusCheck {
                context: context.to_string(),
                state: *state,
            })
            .collect();
        self.inner.lock().unwrap().statuses.insert(sha.to_string(), checks);
    }

    pub fn grant(&self, username: &str, repo: &str) {
        self.inner
            .lock()
            .unwrap()
            .collaborators
            .insert((username.to_string(), repo.to_string()));
    }

    pub fn requests(&self) -> Vec<DeploymentRequest> {
        self.inner.lock().unwrap().requests.clone()
    }
}

impl VersionControl for FakeGitHub {
    fn head_commit(&self, repo: &RepoName, git_ref: &str) -> Result<Option<CommitId>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .heads
            .get(&(repo.to_string(), git_ref.to_string()))
            .cloned())
    }

    fn combined_status(&self, _repo: &RepoName, commit: &CommitId) -> Result<Vec<StatusCheck>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .statuses
            .get(&commit.to_string())
            .cloned()
            .unwrap_or_default())
    }
}

impl AccessGate for FakeGitHub {
    fn can_deploy(&self, user: &User, repo: &RepoName) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .collaborators
            .contains(&(user.username.clone(), repo.to_string())))
    }
}

impl DeploymentSink for FakeGitHub {
    fn create(&self, request: &DeploymentRequest) -> Result<()> {
        self.inner.lock().unwrap().requests.push(request.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub type TestSlipway = Slipway<FakeGitHub, FakeGitHub, FakeGitHub>;

pub const API_REPO: &str = "acme-inc/api";

pub const MASTER_SHA: &str = "ad80a1b3e1a94b98ce99b71a48f811f1";
pub const TOPIC_SHA: &str = "4c7b474c6e1c81553a16d1082cebfa60";
pub const FAILING_SHA: &str = "46c2acc4e588924340adcd108cfc948b";
pub const PENDING_SHA: &str = "9f2a9f6e0f5b4f0e8b4d4d8f2c1a0b9c";

/// Build a slipway instance over `config_yaml` with the standard branch
/// heads and collaborator grants seeded.
pub fn fixture(config_yaml: &str) -> (TempDir, TestSlipway, FakeGitHub) {
    let dir = TempDir::new().unwrap();
    let db = DeployDb::open(&dir.path().join("slipway.db")).unwrap();
    let config = DeployConfig::from_yaml(config_yaml).unwrap();

    let github = FakeGitHub::new();
    github.set_head(API_REPO, "master", MASTER_SHA);
    github.set_head(API_REPO, "topic", TOPIC_SHA);
    github.set_head(API_REPO, "failing", FAILING_SHA);
    github.set_head(API_REPO, "pending", PENDING_SHA);
    github.set_statuses(FAILING_SHA, &[("ci", StatusState::Failure)]);
    github.set_statuses(PENDING_SHA, &[("ci", StatusState::Pending)]);
    for username in ["david", "steve"] {
        github.grant(username, API_REPO);
    }

    let slipway = Slipway::new(config, db, github.clone(), github.clone(), github.clone());
    (dir, slipway, github)
}

pub fn standard_config() -> &'static str {
    r#"
repositories:
  - name: acme-inc/api
    environments:
      - name: production
      - name: staging
        aliases: [stage]
"#
}

pub fn david() -> User {
    User::new("U012AB1AB", "david")
}

pub fn steve() -> User {
    User::new("U98ZY7XW6", "steve")
}

pub fn bob() -> User {
    User::new("U55QQ4RS3", "bob")
}

/// The callback token on the first attachment of a message.
pub fn callback_id(message: &Message) -> String {
    message
        .attachments
        .first()
        .and_then(|a| a.callback_id.clone())
        .expect("message has no callback token")
}

pub fn yes(token: &str) -> ActionPayload {
    ActionPayload {
        token: token.to_string(),
        decision: Decision::Yes,
    }
}

pub fn no(token: &str) -> ActionPayload {
    ActionPayload {
        token: token.to_string(),
        decision: Decision::No,
    }
}

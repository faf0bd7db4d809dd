//! External collaborator contracts and their GitHub implementation.
//!
//! The pipeline consumes three narrow traits: `VersionControl` (resolve
//! refs, read combined status, build links), `AccessGate` (may this
//! identity deploy this repository) and `DeploymentSink` (actually request
//! the deployment — how it executes is not this crate's concern).
//! `GitHubClient` implements all three against the GitHub REST API over a
//! blocking HTTP client; calls are synchronous and a transport failure is
//! a terminal failure for the command that made it.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::Result;
use crate::types::{CommitId, DeploymentRequest, RepoName, StatusCheck, User};

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

pub trait VersionControl {
    /// Resolve a ref to its head commit. `None` when the ref does not exist
    /// upstream.
    fn head_commit(&self, repo: &RepoName, git_ref: &str) -> Result<Option<CommitId>>;

    /// The combined commit status contexts for a commit.
    fn combined_status(&self, repo: &RepoName, commit: &CommitId) -> Result<Vec<StatusCheck>>;

    fn repo_url(&self, repo: &RepoName) -> String {
        format!("https://github.com/{repo}")
    }

    fn commit_url(&self, repo: &RepoName, commit: &CommitId) -> String {
        format!("{}/commits/{commit}", self.repo_url(repo))
    }

    fn compare_url(&self, repo: &RepoName, from: &CommitId, to: &CommitId) -> String {
        format!("{}/compare/{}...{}", self.repo_url(repo), from.short(), to.short())
    }
}

pub trait AccessGate {
    /// Whether `user` has deployment rights on `repo`. Consulted before the
    /// repository is resolved, so a denied user learns nothing else.
    fn can_deploy(&self, user: &User, repo: &RepoName) -> Result<bool>;
}

pub trait DeploymentSink {
    /// Hand off a decided deployment for execution.
    fn create(&self, request: &DeploymentRequest) -> Result<()>;
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
    html_base: String,
}

impl GitHubClient {
    /// Build a client against `api_base` (e.g. `https://api.github.com`),
    /// linking to `html_base` (e.g. `https://github.com`) in messages.
    pub fn new(api_base: impl Into<String>, html_base: impl Into<String>, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("slipway"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            headers.insert(AUTHORIZATION, value);
        }
        let http = Client::builder().default_headers(headers).build()?;
        Ok(GitHubClient {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            html_base: html_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Deserialize)]
struct CombinedStatusResponse {
    statuses: Vec<StatusCheck>,
}

#[derive(Deserialize)]
struct PermissionResponse {
    permission: String,
}

impl VersionControl for GitHubClient {
    fn head_commit(&self, repo: &RepoName, git_ref: &str) -> Result<Option<CommitId>> {
        let url = self.api(&format!("/repos/{repo}/commits/{git_ref}"));
        let response = self.http.get(url).send()?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY) {
            return Ok(None);
        }
        let commit: CommitResponse = response.error_for_status()?.json()?;
        Ok(Some(CommitId::new(commit.sha)))
    }

    fn combined_status(&self, repo: &RepoName, commit: &CommitId) -> Result<Vec<StatusCheck>> {
        let url = self.api(&format!("/repos/{repo}/commits/{commit}/status"));
        let combined: CombinedStatusResponse =
            self.http.get(url).send()?.error_for_status()?.json()?;
        Ok(combined.statuses)
    }

    fn repo_url(&self, repo: &RepoName) -> String {
        format!("{}/{repo}", self.html_base)
    }
}

impl AccessGate for GitHubClient {
    fn can_deploy(&self, user: &User, repo: &RepoName) -> Result<bool> {
        let url = self.api(&format!(
            "/repos/{repo}/collaborators/{}/permission",
            user.username
        ));
        let response = self.http.get(url).send()?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) {
            return Ok(false);
        }
        let permission: PermissionResponse = response.error_for_status()?.json()?;
        Ok(matches!(permission.permission.as_str(), "admin" | "write"))
    }
}

impl DeploymentSink for GitHubClient {
    fn create(&self, request: &DeploymentRequest) -> Result<()> {
        let url = self.api(&format!("/repos/{}/deployments", request.repository));
        let body = json!({
            "ref": request.commit.to_string(),
            "environment": request.environment,
            "auto_merge": false,
            "required_contexts": [],
        });
        self.http.post(url).json(&body).send()?.error_for_status()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StatusState;

    fn client(server: &mockito::Server) -> GitHubClient {
        GitHubClient::new(server.url(), "https://github.com", "t0ken").unwrap()
    }

    fn repo() -> RepoName {
        RepoName::parse("acme-inc/api").unwrap()
    }

    #[test]
    fn head_commit_resolves_sha() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/repos/acme-inc/api/commits/master")
            .with_status(200)
            .with_body(r#"{"sha":"ad80a1b3e1a94b98ce99b71a48f811f1"}"#)
            .create();

        let commit = client(&server).head_commit(&repo(), "master").unwrap();
        assert_eq!(commit, Some(CommitId::new("ad80a1b3e1a94b98ce99b71a48f811f1")));
    }

    #[test]
    fn head_commit_missing_ref_is_none() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock("GET", "/repos/acme-inc/api/commits/nope")
            .with_status(422)
            .with_body(r#"{"message":"No commit found for SHA: nope"}"#)
            .create();

        let commit = client(&server).head_commit(&repo(), "nope").unwrap();
        assert_eq!(commit, None);
    }

    #[test]
    fn combined_status_parses_contexts() {
        let mut server = mockito::Server::new();
        let _m = server
            .mock(
                "GET",
                "/repos/acme-inc/api/commits/46c2acc4e588924340adcd108cfc948b/status",
            )
            .with_status(200)
            .with_body(
                r#"{"state":"failure","statuses":[
                    {"context":"ci","state":"failure"},
                    {"context":"lint","state":"success"}
                ]}"#,
            )
            .create();

        let checks = client(&server)
            .combined_status(&repo(), &CommitId::new("46c2acc4e588924340adcd108cfc948b"))
            .unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].context, "ci");
        assert_eq!(checks[0].state, StatusState::Failure);
    }

    #[test]
    fn can_deploy_requires_write_permission() {
        let mut server = mockito::Server::new();
        let _write = server
            .mock("GET", "/repos/acme-inc/api/collaborators/david/permission")
            .with_status(200)
            .with_body(r#"{"permission":"write"}"#)
            .create();
        let _read = server
            .mock("GET", "/repos/acme-inc/api/collaborators/bob/permission")
            .with_status(200)
            .with_body(r#"{"permission":"read"}"#)
            .create();
        let _missing = server
            .mock("GET", "/repos/acme-inc/api/collaborators/mallory/permission")
            .with_status(404)
            .create();

        let client = client(&server);
        assert!(client.can_deploy(&User::new("U1", "david"), &repo()).unwrap());
        assert!(!client.can_deploy(&User::new("U2", "bob"), &repo()).unwrap());
        assert!(!client.can_deploy(&User::new("U3", "mallory"), &repo()).unwrap());
    }

    #[test]
    fn create_deployment_posts_commit_and_environment() {
        let mut server = mockito::Server::new();
        let m = server
            .mock("POST", "/repos/acme-inc/api/deployments")
            .match_body(mockito::Matcher::PartialJson(json!({
                "ref": "ad80a1b3e1a94b98ce99b71a48f811f1",
                "environment": "production",
            })))
            .with_status(201)
            .with_body("{}")
            .create();

        let request = DeploymentRequest {
            requester: crate::types::UserId::new("U1"),
            repository: repo(),
            git_ref: "master".to_string(),
            commit: CommitId::new("ad80a1b3e1a94b98ce99b71a48f811f1"),
            environment: "production".to_string(),
            previous_commit: None,
        };
        client(&server).create(&request).unwrap();
        m.assert();
    }

    #[test]
    fn link_builders_use_html_base() {
        let server = mockito::Server::new();
        let client = client(&server);
        assert_eq!(client.repo_url(&repo()), "https://github.com/acme-inc/api");
        assert_eq!(
            client.compare_url(
                &repo(),
                &CommitId::new("4c7b474c6e1c81553a16d1082cebfa60"),
                &CommitId::new("ad80a1b3e1a94b98ce99b71a48f811f1"),
            ),
            "https://github.com/acme-inc/api/compare/4c7b474...ad80a1b"
        );
    }
}

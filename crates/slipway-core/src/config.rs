//! Deployment configuration — the repositories and environments slipway
//! knows about.
//!
//! These are externally administered records. The pipeline only reads
//! them; the lock table is the sole state it mutates per environment.

use crate::error::{Result, SlipwayError};
use crate::types::{RepoName, RepoToken};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ref deployed when neither the command nor the environment names one.
pub const DEFAULT_REF: &str = "master";

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Ref deployed here when the command names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ref: Option<String>,
    /// When set, CI already deploys this ref automatically; a manual
    /// deploy of it requires confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_deploy_ref: Option<String>,
}

impl Environment {
    pub fn matches(&self, token: &str) -> bool {
        self.name == token || self.aliases.iter().any(|a| a == token)
    }

    pub fn default_ref(&self) -> &str {
        self.default_ref.as_deref().unwrap_or(DEFAULT_REF)
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub name: RepoName,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_environment: Option<String>,
}

impl Repository {
    /// Look up an environment by name or alias.
    pub fn environment(&self, token: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.matches(token))
    }

    pub fn default_environment(&self) -> Option<&Environment> {
        let name = self.default_environment.as_deref()?;
        self.environment(name)
    }

    /// Resolve the target environment for a deploy: the explicit token if
    /// given, otherwise the repository default.
    pub fn resolve_environment(&self, token: Option<&str>) -> Result<&Environment> {
        match token {
            Some(t) => self
                .environment(t)
                .ok_or_else(|| SlipwayError::validation("environment name", "unknown environment")),
            None => self
                .default_environment()
                .ok_or_else(|| SlipwayError::validation("environment name", "can't be blank")),
        }
    }
}

// ---------------------------------------------------------------------------
// DeployConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeployConfig {
    #[serde(default)]
    pub repositories: Vec<Repository>,
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let config: DeployConfig = serde_yaml::from_str(data)?;
        Ok(config)
    }

    /// Resolve a repository token: full names match exactly; bare names
    /// must match exactly one configured repository's name segment.
    pub fn repository(&self, token: &RepoToken) -> Result<&Repository> {
        match token {
            RepoToken::Full(name) => self
                .repositories
                .iter()
                .find(|r| r.name == *name)
                .ok_or_else(|| SlipwayError::RepositoryNotFound(name.to_string())),
            RepoToken::Short(name) => {
                let mut matches = self.repositories.iter().filter(|r| r.name.name() == name);
                let first = matches
                    .next()
                    .ok_or_else(|| SlipwayError::RepositoryNotFound(name.clone()))?;
                if matches.next().is_some() {
                    return Err(SlipwayError::validation(
                        "repository name",
                        format!("{name} is ambiguous, use the full owner/name form"),
                    ));
                }
                Ok(first)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

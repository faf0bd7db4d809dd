//! Command text parsing.
//!
//! Raw chat text becomes a closed set of `Intent` variants. Keywords are
//! case-insensitive; repository, ref and environment tokens are free-form
//! (repository syntax is validated by `RepoToken`). Anything that matches
//! no grammar is `UnknownCommand`, reported separately from validation
//! failures.

use crate::error::{Result, SlipwayError};
use crate::types::RepoToken;
use regex::Regex;
use std::sync::OnceLock;

pub const HELP_USAGE: &str = "\
To deploy the default ref of a repository to its default environment:
/deploy <owner/repo>
To deploy a branch to a specific environment (add a trailing ! to skip one confirmation):
/deploy <owner/repo>@<ref> to <environment>
To lock an environment while you're using it (add a trailing ! to steal it):
/deploy lock <environment> on <owner/repo>: <reason>
To unlock it again:
/deploy unlock <environment> on <owner/repo>
To see who holds a lock:
/deploy check <environment> on <owner/repo>
To list the environments a repository deploys to:
/deploy where <owner/repo>";

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Help,
    Deploy(DeployCommand),
    Lock {
        repository: RepoToken,
        environment: String,
        message: Option<String>,
        force: bool,
    },
    Unlock {
        repository: RepoToken,
        environment: String,
    },
    Check {
        repository: RepoToken,
        environment: String,
    },
    Where {
        repository: RepoToken,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeployCommand {
    pub repository: RepoToken,
    pub git_ref: Option<String>,
    pub environment: Option<String>,
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

static HELP_RE: OnceLock<Regex> = OnceLock::new();
static LOCK_RE: OnceLock<Regex> = OnceLock::new();
static UNLOCK_RE: OnceLock<Regex> = OnceLock::new();
static CHECK_RE: OnceLock<Regex> = OnceLock::new();
static WHERE_RE: OnceLock<Regex> = OnceLock::new();
static DEPLOY_RE: OnceLock<Regex> = OnceLock::new();

fn help_re() -> &'static Regex {
    HELP_RE.get_or_init(|| Regex::new(r"^(?i:help)$").unwrap())
}

fn lock_re() -> &'static Regex {
    LOCK_RE.get_or_init(|| {
        Regex::new(r"^(?i:lock)\s+(?P<env>\S+)\s+(?i:on)\s+(?P<repo>[^\s:!]+)(?P<force>!)?(?:\s*:\s*(?P<msg>.+))?$")
            .unwrap()
    })
}

fn unlock_re() -> &'static Regex {
    UNLOCK_RE.get_or_init(|| {
        Regex::new(r"^(?i:unlock)\s+(?P<env>\S+)\s+(?i:on)\s+(?P<repo>\S+)$").unwrap()
    })
}

fn check_re() -> &'static Regex {
    CHECK_RE.get_or_init(|| {
        Regex::new(r"^(?i:check)\s+(?P<env>\S+)\s+(?i:on)\s+(?P<repo>\S+)$").unwrap()
    })
}

fn where_re() -> &'static Regex {
    WHERE_RE.get_or_init(|| Regex::new(r"^(?i:where)\s+(?P<repo>\S+)$").unwrap())
}

fn deploy_re() -> &'static Regex {
    DEPLOY_RE.get_or_init(|| {
        Regex::new(
            r"^(?P<repo>[^\s@!]+)(?:@(?P<ref>[^\s!]+))?(?:\s+(?i:to)\s+(?P<env>[^\s!]+))?(?P<force>!)?$",
        )
        .unwrap()
    })
}

/// Bare keywords never parse as a repository deploy.
const RESERVED: &[&str] = &["help", "lock", "unlock", "check", "where", "to", "on"];

// ---------------------------------------------------------------------------
// parse
// ---------------------------------------------------------------------------

pub fn parse(text: &str) -> Result<Intent> {
    let text = text.trim();
    if text.is_empty() {
        return Err(SlipwayError::UnknownCommand);
    }

    if help_re().is_match(text) {
        return Ok(Intent::Help);
    }

    if let Some(caps) = lock_re().captures(text) {
        return Ok(Intent::Lock {
            repository: RepoToken::parse(&caps["repo"])?,
            environment: caps["env"].to_string(),
            message: caps.name("msg").map(|m| m.as_str().trim().to_string()),
            force: caps.name("force").is_some(),
        });
    }

    if let Some(caps) = unlock_re().captures(text) {
        return Ok(Intent::Unlock {
            repository: RepoToken::parse(&caps["repo"])?,
            environment: caps["env"].to_string(),
        });
    }

    if let Some(caps) = check_re().captures(text) {
        return Ok(Intent::Check {
            repository: RepoToken::parse(&caps["repo"])?,
            environment: caps["env"].to_string(),
        });
    }

    if let Some(caps) = where_re().captures(text) {
        return Ok(Intent::Where {
            repository: RepoToken::parse(&caps["repo"])?,
        });
    }

    if let Some(caps) = deploy_re().captures(text) {
        let repo = &caps["repo"];
        if RESERVED.iter().any(|k| repo.eq_ignore_ascii_case(k)) {
            return Err(SlipwayError::UnknownCommand);
        }
        return Ok(Intent::Deploy(DeployCommand {
            repository: RepoToken::parse(repo)?,
            git_ref: caps.name("ref").map(|m| m.as_str().to_string()),
            environment: caps.name("env").map(|m| m.as_str().to_string()),
            force: caps.name("force").is_some(),
        }));
    }

    Err(SlipwayError::UnknownCommand)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RepoName;

    fn full(name: &str) -> RepoToken {
        RepoToken::Full(RepoName::parse(name).unwrap())
    }

    #[test]
    fn parses_help() {
        assert_eq!(parse("help").unwrap(), Intent::Help);
        assert_eq!(parse("HELP").unwrap(), Intent::Help);
    }

    #[test]
    fn parses_simple_deploy() {
        let intent = parse("acme-inc/api to production").unwrap();
        assert_eq!(
            intent,
            Intent::Deploy(DeployCommand {
                repository: full("acme-inc/api"),
                git_ref: None,
                environment: Some("production".to_string()),
                force: false,
            })
        );
    }

    #[test]
    fn parses_deploy_with_ref_and_force() {
        let intent = parse("acme-inc/api@topic to production!").unwrap();
        assert_eq!(
            intent,
            Intent::Deploy(DeployCommand {
                repository: full("acme-inc/api"),
                git_ref: Some("topic".to_string()),
                environment: Some("production".to_string()),
                force: true,
            })
        );
    }

    #[test]
    fn parses_bare_repo_deploy() {
        let intent = parse("api@topic").unwrap();
        assert_eq!(
            intent,
            Intent::Deploy(DeployCommand {
                repository: RepoToken::Short("api".to_string()),
                git_ref: Some("topic".to_string()),
                environment: None,
                force: false,
            })
        );
    }

    #[test]
    fn deploy_force_without_environment() {
        let intent = parse("acme-inc/api@master!").unwrap();
        match intent {
            Intent::Deploy(cmd) => {
                assert!(cmd.force);
                assert_eq!(cmd.git_ref.as_deref(), Some("master"));
                assert_eq!(cmd.environment, None);
            }
            other => panic!("expected deploy, got {other:?}"),
        }
    }

    #[test]
    fn parses_lock_with_message() {
        let intent = parse("lock staging on acme-inc/api: I'm testing some stuff").unwrap();
        assert_eq!(
            intent,
            Intent::Lock {
                repository: full("acme-inc/api"),
                environment: "staging".to_string(),
                message: Some("I'm testing some stuff".to_string()),
                force: false,
            }
        );
    }

    #[test]
    fn parses_lock_steal() {
        let intent = parse("lock staging on acme-inc/api!").unwrap();
        assert_eq!(
            intent,
            Intent::Lock {
                repository: full("acme-inc/api"),
                environment: "staging".to_string(),
                message: None,
                force: true,
            }
        );
    }

    #[test]
    fn parses_unlock_check_where() {
        assert_eq!(
            parse("unlock staging on acme-inc/api").unwrap(),
            Intent::Unlock {
                repository: full("acme-inc/api"),
                environment: "staging".to_string(),
            }
        );
        assert_eq!(
            parse("check production on acme-inc/api").unwrap(),
            Intent::Check {
                repository: full("acme-inc/api"),
                environment: "production".to_string(),
            }
        );
        assert_eq!(
            parse("where acme-inc/api").unwrap(),
            Intent::Where {
                repository: full("acme-inc/api"),
            }
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert!(matches!(parse("LOCK staging ON acme-inc/api"), Ok(Intent::Lock { .. })));
        assert!(matches!(
            parse("acme-inc/api TO production"),
            Ok(Intent::Deploy(_))
        ));
    }

    #[test]
    fn unknown_command_is_distinct_from_validation() {
        assert!(matches!(
            parse("deploy the thing please"),
            Err(SlipwayError::UnknownCommand)
        ));
        assert!(matches!(parse(""), Err(SlipwayError::UnknownCommand)));
        assert!(matches!(parse("lock"), Err(SlipwayError::UnknownCommand)));

        match parse("acme-inc/$api@master to production") {
            Err(SlipwayError::Validation { field, .. }) => assert_eq!(field, "repository name"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}

//! Configuration file loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::ConfigError;
use crate::types::ItemKey;

/// Environment variable overriding the default configuration path.
pub const CONFIG_ENV: &str = "PR_RECONCILER_CONFIG";

const APP_DIR: &str = "pr-reconciler";

/// Reconciler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Repositories scanned by discovery (e.g., "acme/widgets")
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Author filter for discovery
    #[serde(default = "default_author")]
    pub author: String,
    /// Explicit items tracked in addition to discovered ones
    #[serde(default)]
    pub tracked_items: Vec<ItemKey>,
    /// Seconds between cycle starts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Where the state store lives
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Head branches conflict resolution must never touch
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
    /// Comment authors ignored entirely (usually the reconciler's own account)
    #[serde(default)]
    pub ignored_comment_authors: Vec<String>,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// How the remediation agent is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Clone root. `<workingDir>/<repo>` is preferred when it exists.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_agent_timeout")]
    pub timeout_secs: u64,
    /// Handlebars override for the conflict-resolution instructions
    #[serde(default)]
    pub conflict_template: Option<String>,
    /// Handlebars override for the review-resolution instructions
    #[serde(default)]
    pub review_template: Option<String>,
}

fn default_author() -> String {
    "@me".to_string()
}
fn default_poll_interval() -> u64 {
    600
}
fn default_state_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("state.json")
}
fn default_protected_branches() -> Vec<String> {
    ["main", "master", "develop", "release"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_agent_command() -> String {
    "claude".to_string()
}
fn default_agent_args() -> Vec<String> {
    vec![
        "--print".to_string(),
        "--dangerously-skip-permissions".to_string(),
    ]
}
fn default_agent_timeout() -> u64 {
    1800
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repositories: vec![],
            author: default_author(),
            tracked_items: vec![],
            poll_interval_secs: default_poll_interval(),
            state_file: default_state_file(),
            protected_branches: default_protected_branches(),
            ignored_comment_authors: vec![],
            agent: AgentConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            working_dir: None,
            timeout_secs: default_agent_timeout(),
            conflict_template: None,
            review_template: None,
        }
    }
}

impl Config {
    /// Default configuration path: `$PR_RECONCILER_CONFIG`, else the
    /// platform config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.json"))
            .ok_or(ConfigError::NoDefaultPath)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let config: Self =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;

        debug!(
            path = %path.display(),
            repositories = config.repositories.len(),
            tracked_items = config.tracked_items.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "pollIntervalSecs must be greater than zero".to_string(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "agent.command must not be empty".to_string(),
            ));
        }
        if self.agent.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent.timeoutSecs must be greater than zero".to_string(),
            ));
        }
        if let Some(repo) = self.repositories.iter().find(|r| !is_repository_slug(r)) {
            return Err(ConfigError::Invalid(format!(
                "repository '{repo}' must be owner/repo"
            )));
        }
        if self.repositories.is_empty() && self.tracked_items.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one of repositories or trackedItems must be set".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn is_repository_slug(value: &str) -> bool {
    matches!(
        value.split_once('/'),
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
    )
}

impl AgentConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(r#"{"repositories": ["acme/widgets"]}"#);
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.author, "@me");
        assert_eq!(config.poll_interval(), Duration::from_secs(600));
        assert_eq!(
            config.protected_branches,
            vec!["main", "master", "develop", "release"]
        );
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.timeout(), Duration::from_secs(1800));
        assert!(config.state_file.ends_with("pr-reconciler/state.json"));
        assert!(config.tracked_items.is_empty());
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"{
                "repositories": ["acme/widgets"],
                "author": "octocat",
                "trackedItems": ["acme/gadgets#12"],
                "pollIntervalSecs": 60,
                "stateFile": "/tmp/reconciler/state.json",
                "protectedBranches": ["trunk"],
                "ignoredCommentAuthors": ["reconciler-bot"],
                "agent": {
                    "command": "codex",
                    "args": ["exec"],
                    "workingDir": "/src",
                    "timeoutSecs": 90,
                    "reviewTemplate": "Fix {{item}}"
                }
            }"#,
        );
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.author, "octocat");
        assert_eq!(
            config.tracked_items,
            vec!["acme/gadgets#12".parse::<ItemKey>().unwrap()]
        );
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(
            config.state_file,
            PathBuf::from("/tmp/reconciler/state.json")
        );
        assert_eq!(config.protected_branches, vec!["trunk"]);
        assert_eq!(config.ignored_comment_authors, vec!["reconciler-bot"]);
        assert_eq!(config.agent.command, "codex");
        assert_eq!(config.agent.args, vec!["exec"]);
        assert_eq!(config.agent.working_dir, Some(PathBuf::from("/src")));
        assert_eq!(
            config.agent.review_template.as_deref(),
            Some("Fix {{item}}")
        );
        assert!(config.agent.conflict_template.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_json() {
        let file = write_config("{ not json");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_malformed_tracked_item_is_rejected() {
        let file = write_config(r#"{"trackedItems": ["acme/widgets-7"]}"#);
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let file = write_config(r#"{"repositories": ["acme/widgets"], "pollIntervalSecs": 0}"#);
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("pollIntervalSecs")));
    }

    #[test]
    fn test_nothing_to_track_is_invalid() {
        let file = write_config("{}");
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_repository_slug_is_invalid() {
        let config = Config {
            repositories: vec!["widgets".to_string()],
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_agent_command_is_invalid() {
        let mut config = Config {
            repositories: vec!["acme/widgets".to_string()],
            ..Config::default()
        };
        config.agent.command = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}

//! Remediation through an external coding agent CLI.
//!
//! The agent is handed rendered instructions as its final argument and runs
//! inside the repository checkout. It is expected to push its own commits;
//! the reconciler only looks at the exit status.

use anyhow::{Context, Result};
use async_trait::async_trait;
use handlebars::Handlebars;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::collaborators::{ActionExecutor, ActionOutcome};
use crate::config::AgentConfig;
use crate::types::{ItemKey, ReviewComment};

const CONFLICT_TEMPLATE: &str = "conflict";
const REVIEW_TEMPLATE: &str = "review";

/// Bytes of stderr kept in a failure detail.
const STDERR_TAIL: usize = 2000;

const DEFAULT_CONFLICT_TEMPLATE: &str = r"Pull request {{item}} has merge conflicts with its base branch.

Check out branch `{{head_ref}}`, merge or rebase `{{base_ref}}` into it, and resolve every conflict.
Keep the intent of both sides. Build and run the tests, then push the result to `{{head_ref}}`.
Do not push to `{{base_ref}}`.
";

const DEFAULT_REVIEW_TEMPLATE: &str = r"Pull request {{item}} has {{comment_count}} unaddressed review comment(s).

Check out branch `{{head_ref}}` and address each comment below. Make the requested change, or
reply on the pull request explaining why not. Build and run the tests, then push to `{{head_ref}}`.
{{#each comments}}
---
Comment {{this.id}} by @{{this.author}} at {{this.location}}:
{{this.body}}
{{/each}}
";

/// Runs the configured agent command for each remediation.
pub struct AgentExecutor {
    config: AgentConfig,
    timeout: Duration,
    templates: Handlebars<'static>,
}

impl AgentExecutor {
    /// Build an executor, compiling the instruction templates.
    pub fn new(config: AgentConfig) -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        templates.register_escape_fn(handlebars::no_escape);

        let conflict = config
            .conflict_template
            .as_deref()
            .unwrap_or(DEFAULT_CONFLICT_TEMPLATE);
        let review = config
            .review_template
            .as_deref()
            .unwrap_or(DEFAULT_REVIEW_TEMPLATE);

        templates
            .register_template_string(CONFLICT_TEMPLATE, conflict)
            .context("Invalid conflict template")?;
        templates
            .register_template_string(REVIEW_TEMPLATE, review)
            .context("Invalid review template")?;

        Ok(Self {
            timeout: config.timeout(),
            config,
            templates,
        })
    }

    /// Override the configured timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `<workingDir>/<repo>` when it exists, else `workingDir`.
    fn working_dir(&self, item: &ItemKey) -> Option<PathBuf> {
        let root = self.config.working_dir.as_ref()?;
        let checkout = root.join(item.repo_name());
        if checkout.is_dir() {
            Some(checkout)
        } else {
            Some(root.clone())
        }
    }

    pub fn render_conflict_prompt(
        &self,
        item: &ItemKey,
        head_ref: &str,
        base_ref: &str,
    ) -> Result<String> {
        let data = json!({
            "item": item.to_string(),
            "repository": item.repository(),
            "number": item.number(),
            "head_ref": head_ref,
            "base_ref": base_ref,
        });
        self.templates
            .render(CONFLICT_TEMPLATE, &data)
            .context("Failed to render conflict prompt")
    }

    pub fn render_review_prompt(
        &self,
        item: &ItemKey,
        head_ref: &str,
        comments: &[ReviewComment],
    ) -> Result<String> {
        let data = json!({
            "item": item.to_string(),
            "repository": item.repository(),
            "number": item.number(),
            "head_ref": head_ref,
            "comment_count": comments.len(),
            "comments": comments,
        });
        self.templates
            .render(REVIEW_TEMPLATE, &data)
            .context("Failed to render review prompt")
    }

    async fn run(&self, item: &ItemKey, prompt: String) -> Result<ActionOutcome> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let dir = self.working_dir(item);
        if let Some(dir) = &dir {
            cmd.current_dir(dir);
        }

        debug!(
            item = %item,
            command = %self.config.command,
            working_dir = ?dir,
            timeout_secs = self.timeout.as_secs(),
            "Spawning agent"
        );

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn agent '{}'", self.config.command))?;

        let Ok(output) = tokio::time::timeout(self.timeout, child.wait_with_output()).await else {
            warn!(item = %item, timeout_secs = self.timeout.as_secs(), "Agent timed out, killed");
            return Ok(ActionOutcome::failure(format!(
                "agent timed out after {:?}",
                self.timeout
            )));
        };
        let output = output.context("Failed to wait for agent")?;

        if output.status.success() {
            info!(item = %item, "Agent finished successfully");
            return Ok(ActionOutcome::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = format!(
            "agent exited with {}: {}",
            output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| format!("code {c}")),
            tail(stderr.trim(), STDERR_TAIL)
        );
        warn!(item = %item, exit_code = ?output.status.code(), "Agent failed");
        Ok(ActionOutcome::Failure { detail })
    }
}

/// Last `max` bytes of `s`, cut on a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[async_trait]
impl ActionExecutor for AgentExecutor {
    async fn resolve_conflicts(
        &self,
        item: &ItemKey,
        head_ref: &str,
        base_ref: &str,
    ) -> Result<ActionOutcome> {
        let prompt = self.render_conflict_prompt(item, head_ref, base_ref)?;
        self.run(item, prompt).await
    }

    async fn address_reviews(
        &self,
        item: &ItemKey,
        head_ref: &str,
        comments: &[ReviewComment],
    ) -> Result<ActionOutcome> {
        let prompt = self.render_review_prompt(item, head_ref, comments)?;
        self.run(item, prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ItemKey {
        "acme/widgets#7".parse().unwrap()
    }

    fn shell(script: &str, working_dir: Option<PathBuf>) -> AgentConfig {
        AgentConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "agent".to_string()],
            working_dir,
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_default_conflict_prompt() {
        let executor = AgentExecutor::new(AgentConfig::default()).unwrap();
        let prompt = executor
            .render_conflict_prompt(&key(), "feature/login", "main")
            .unwrap();
        assert!(prompt.contains("acme/widgets#7"));
        assert!(prompt.contains("`feature/login`"));
        assert!(prompt.contains("`main`"));
    }

    #[test]
    fn test_default_review_prompt_lists_comments_unescaped() {
        let executor = AgentExecutor::new(AgentConfig::default()).unwrap();
        let comments = vec![ReviewComment {
            id: 41,
            cursor: 1_700_000_000_000,
            author: "alice".to_string(),
            location: "src/lib.rs:3".to_string(),
            body: "use `Option<&str>` here".to_string(),
        }];
        let prompt = executor
            .render_review_prompt(&key(), "feature/login", &comments)
            .unwrap();
        assert!(prompt.contains("1 unaddressed"));
        assert!(prompt.contains("Comment 41 by @alice at src/lib.rs:3"));
        assert!(prompt.contains("Option<&str>"));
    }

    #[test]
    fn test_custom_template_strict_mode() {
        let config = AgentConfig {
            review_template: Some("{{missing_field}}".to_string()),
            ..AgentConfig::default()
        };
        let executor = AgentExecutor::new(config).unwrap();
        assert!(executor.render_review_prompt(&key(), "x", &[]).is_err());
    }

    #[test]
    fn test_invalid_template_rejected() {
        let config = AgentConfig {
            conflict_template: Some("{{#each comments}}unterminated".to_string()),
            ..AgentConfig::default()
        };
        assert!(AgentExecutor::new(config).is_err());
    }

    #[test]
    fn test_tail_respects_char_boundary() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_zero_is_success_and_prompt_is_last_arg() {
        let dir = tempfile::tempdir().unwrap();
        let executor = AgentExecutor::new(shell(
            "printf '%s' \"$1\" > prompt.txt",
            Some(dir.path().to_path_buf()),
        ))
        .unwrap();

        let outcome = executor
            .resolve_conflicts(&key(), "feature/login", "main")
            .await
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Success);

        let prompt = std::fs::read_to_string(dir.path().join("prompt.txt")).unwrap();
        assert!(prompt.contains("acme/widgets#7"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prefers_repository_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("widgets")).unwrap();
        let executor =
            AgentExecutor::new(shell("pwd > where.txt", Some(dir.path().to_path_buf()))).unwrap();

        executor
            .resolve_conflicts(&key(), "feature/login", "main")
            .await
            .unwrap();
        assert!(dir.path().join("widgets").join("where.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure_with_stderr() {
        let executor = AgentExecutor::new(shell("echo 'merge failed' >&2; exit 3", None)).unwrap();
        let outcome = executor.address_reviews(&key(), "x", &[]).await.unwrap();
        match outcome {
            ActionOutcome::Failure { detail } => {
                assert!(detail.contains("code 3"));
                assert!(detail.contains("merge failed"));
            }
            ActionOutcome::Success => panic!("expected failure"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_failure() {
        let executor = AgentExecutor::new(shell("sleep 5", None))
            .unwrap()
            .with_timeout(Duration::from_millis(100));
        let outcome = executor.address_reviews(&key(), "x", &[]).await.unwrap();
        assert!(matches!(
            outcome,
            ActionOutcome::Failure { detail } if detail.contains("timed out")
        ));
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let config = AgentConfig {
            command: "/nonexistent/agent-binary".to_string(),
            ..AgentConfig::default()
        };
        let executor = AgentExecutor::new(config).unwrap();
        assert!(executor
            .resolve_conflicts(&key(), "x", "main")
            .await
            .is_err());
    }
}

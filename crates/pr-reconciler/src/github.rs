//! GitHub collaborators backed by the `gh` CLI.
//!
//! Status, comments, discovery and draft conversion all shell out to `gh`,
//! which owns authentication. Output parsing is kept in pure functions so it
//! can be tested without a GitHub account.
//!
//! Inline review comments and conversation comments come from separate id
//! sequences, so comment cursors are creation times in epoch milliseconds.
//! The GitHub id is carried along for the prompt only.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::collaborators::{CommentSource, Discovery, DraftControl, StatusProvider};
use crate::config::Config;
use crate::types::{ItemKey, ItemState, ItemStatus, MergeState, ReviewComment};

const PR_VIEW_FIELDS: &str = "state,mergeable,headRefOid,headRefName,baseRefName,isDraft";

/// Location used for comments on the conversation tab.
pub const CONVERSATION: &str = "conversation";

/// `gh`-backed implementation of every GitHub-facing collaborator.
#[derive(Debug, Clone)]
pub struct GhCli {
    program: String,
    repositories: Vec<String>,
    author: String,
    tracked_items: Vec<ItemKey>,
    ignored_authors: HashSet<String>,
}

impl GhCli {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            program: "gh".to_string(),
            repositories: config.repositories.clone(),
            author: config.author.clone(),
            tracked_items: config.tracked_items.clone(),
            ignored_authors: config
                .ignored_comment_authors
                .iter()
                .map(|a| a.to_lowercase())
                .collect(),
        }
    }

    /// Use a different executable than `gh` from `PATH`.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn output(&self, args: &[String]) -> Result<Output> {
        debug!(program = %self.program, args = ?args, "Running gh");
        Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute {} {}", self.program, args.join(" ")))
    }

    /// Run `gh` and return stdout, failing on a non-zero exit.
    async fn run(&self, args: &[String]) -> Result<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "gh {} failed: {}",
                args.first().map_or("", String::as_str),
                stderr.trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn fetch_comments(&self, item: &ItemKey) -> Result<Vec<ReviewComment>> {
        let repository = item.repository();
        let review_path = format!("repos/{repository}/pulls/{}/comments", item.number());
        let issue_path = format!("repos/{repository}/issues/{}/comments", item.number());

        let review = self
            .run(&args(["api", "--paginate", review_path.as_str()]))
            .await
            .with_context(|| format!("Failed to fetch review comments for {item}"))?;
        let conversation = self
            .run(&args(["api", "--paginate", issue_path.as_str()]))
            .await
            .with_context(|| format!("Failed to fetch conversation comments for {item}"))?;

        let mut comments = parse_review_comments(&review)?;
        comments.extend(parse_issue_comments(&conversation)?);
        Ok(filter_comments(comments, &self.ignored_authors, None))
    }

    async fn list_repository(&self, repository: &str) -> Result<Vec<ItemKey>> {
        let stdout = self
            .run(&args([
                "pr",
                "list",
                "--repo",
                repository,
                "--author",
                self.author.as_str(),
                "--state",
                "open",
                "--json",
                "number",
            ]))
            .await?;
        parse_pr_list(repository, &stdout)
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

#[async_trait]
impl StatusProvider for GhCli {
    async fn get_status(&self, item: &ItemKey) -> Result<Option<ItemStatus>> {
        let number = item.number().to_string();
        let repository = item.repository();
        let output = self
            .output(&args([
                "pr",
                "view",
                number.as_str(),
                "--repo",
                repository.as_str(),
                "--json",
                PR_VIEW_FIELDS,
            ]))
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_not_found(&stderr) {
                return Ok(None);
            }
            anyhow::bail!("gh pr view failed for {item}: {}", stderr.trim());
        }

        let view = parse_pr_view(&String::from_utf8_lossy(&output.stdout))
            .with_context(|| format!("Failed to parse status for {item}"))?;
        let latest_comment_id = self
            .fetch_comments(item)
            .await?
            .iter()
            .map(|c| c.cursor)
            .max();

        Ok(Some(view.into_status(latest_comment_id)))
    }
}

#[async_trait]
impl CommentSource for GhCli {
    async fn get_comments_after(
        &self,
        item: &ItemKey,
        waterline: Option<u64>,
    ) -> Result<Vec<ReviewComment>> {
        let comments = self.fetch_comments(item).await?;
        Ok(filter_comments(comments, &HashSet::new(), waterline))
    }
}

#[async_trait]
impl Discovery for GhCli {
    async fn list_tracked_items(&self) -> Result<BTreeSet<ItemKey>> {
        let mut items: BTreeSet<ItemKey> = self.tracked_items.iter().cloned().collect();
        let mut failures = 0usize;

        for repository in &self.repositories {
            match self.list_repository(repository).await {
                Ok(found) => {
                    debug!(
                        repository = %repository,
                        count = found.len(),
                        "Listed open pull requests"
                    );
                    items.extend(found);
                }
                Err(e) => {
                    warn!(
                        repository = %repository,
                        error = %format!("{e:#}"),
                        "Failed to list pull requests"
                    );
                    failures += 1;
                }
            }
        }

        if failures > 0 && failures == self.repositories.len() && self.tracked_items.is_empty() {
            anyhow::bail!("pull request listing failed for every configured repository");
        }
        Ok(items)
    }
}

#[async_trait]
impl DraftControl for GhCli {
    async fn convert_to_draft(&self, item: &ItemKey) -> Result<()> {
        let number = item.number().to_string();
        let repository = item.repository();
        self.run(&args([
            "pr",
            "ready",
            number.as_str(),
            "--repo",
            repository.as_str(),
            "--undo",
        ]))
        .await
        .with_context(|| format!("Failed to convert {item} to draft"))?;

        info!(item = %item, "Converted pull request to draft");
        Ok(())
    }
}

/// Output of `gh pr view --json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestView {
    pub state: String,
    #[serde(default)]
    pub mergeable: String,
    pub head_ref_oid: String,
    pub head_ref_name: String,
    pub base_ref_name: String,
    #[serde(default)]
    pub is_draft: bool,
}

impl PullRequestView {
    #[must_use]
    pub fn into_status(self, latest_comment_id: Option<u64>) -> ItemStatus {
        ItemStatus {
            state: ItemState::from_host(&self.state),
            merge_state: MergeState::from_host(&self.mergeable),
            head_revision: self.head_ref_oid,
            head_ref: self.head_ref_name,
            base_ref: self.base_ref_name,
            latest_comment_id,
            is_draft: self.is_draft,
        }
    }
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiReviewComment {
    id: u64,
    user: Option<User>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    path: String,
    line: Option<u64>,
    original_line: Option<u64>,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct ApiIssueComment {
    id: u64,
    user: Option<User>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct ListedPullRequest {
    number: u64,
}

fn login(user: Option<User>) -> String {
    user.map_or_else(|| "ghost".to_string(), |u| u.login)
}

/// Creation time in epoch milliseconds.
fn cursor(created_at: DateTime<Utc>) -> u64 {
    u64::try_from(created_at.timestamp_millis()).unwrap_or_default()
}

pub fn parse_pr_view(stdout: &str) -> Result<PullRequestView> {
    serde_json::from_str(stdout).context("Failed to parse gh pr view output")
}

/// Parse `gh api --paginate` output, which is one JSON array per page.
fn parse_pages<T: DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
    let mut all = Vec::new();
    for page in serde_json::Deserializer::from_str(stdout).into_iter::<Vec<T>>() {
        all.extend(page.context("Failed to parse gh api output")?);
    }
    Ok(all)
}

/// Inline review comments, located at `path:line`.
pub fn parse_review_comments(stdout: &str) -> Result<Vec<ReviewComment>> {
    Ok(parse_pages::<ApiReviewComment>(stdout)?
        .into_iter()
        .map(|c| {
            let location = match c.line.or(c.original_line) {
                Some(line) => format!("{}:{line}", c.path),
                None => c.path,
            };
            ReviewComment {
                id: c.id,
                cursor: cursor(c.created_at),
                author: login(c.user),
                location,
                body: c.body,
            }
        })
        .collect())
}

/// Conversation comments.
pub fn parse_issue_comments(stdout: &str) -> Result<Vec<ReviewComment>> {
    Ok(parse_pages::<ApiIssueComment>(stdout)?
        .into_iter()
        .map(|c| ReviewComment {
            id: c.id,
            cursor: cursor(c.created_at),
            author: login(c.user),
            location: CONVERSATION.to_string(),
            body: c.body,
        })
        .collect())
}

pub fn parse_pr_list(repository: &str, stdout: &str) -> Result<Vec<ItemKey>> {
    let listed: Vec<ListedPullRequest> =
        serde_json::from_str(stdout).context("Failed to parse gh pr list output")?;
    listed
        .into_iter()
        .map(|pr| ItemKey::new(repository, pr.number).map_err(anyhow::Error::from))
        .collect()
}

/// Drop ignored authors and anything at or below `waterline`, oldest first.
///
/// `ignored` must hold lowercased logins. Comments sharing a cursor are all
/// kept.
#[must_use]
pub fn filter_comments(
    comments: Vec<ReviewComment>,
    ignored: &HashSet<String>,
    waterline: Option<u64>,
) -> Vec<ReviewComment> {
    let mut kept: Vec<ReviewComment> = comments
        .into_iter()
        .filter(|c| !ignored.contains(&c.author.to_lowercase()))
        .filter(|c| waterline.map_or(true, |w| c.cursor > w))
        .collect();
    kept.sort_by_key(|c| (c.cursor, c.id));
    kept
}

/// Whether `gh pr view` stderr means the pull request does not exist.
#[must_use]
pub fn is_not_found(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no pull requests found") || stderr.contains("could not resolve")
}

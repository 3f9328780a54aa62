//! Core types shared by the reconciler and its collaborators.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Canonical identity of a tracked pull request: `owner/repo#number`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemKey {
    owner: String,
    repo: String,
    number: u64,
}

/// Error returned when an item key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid item key '{input}': {reason}")]
pub struct ItemKeyError {
    pub input: String,
    pub reason: &'static str,
}

impl ItemKey {
    /// Build a key from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `repository` is not an `owner/repo` slug or `number` is zero.
    pub fn new(repository: &str, number: u64) -> Result<Self, ItemKeyError> {
        format!("{repository}#{number}").parse()
    }

    /// Repository slug, `owner/repo`.
    #[must_use]
    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Repository owner.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name without owner.
    #[must_use]
    pub fn repo_name(&self) -> &str {
        &self.repo
    }

    /// Pull request number.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl FromStr for ItemKey {
    type Err = ItemKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ItemKeyError {
            input: s.to_string(),
            reason,
        };

        let (slug, number) = s.trim().rsplit_once('#').ok_or_else(|| err("missing '#'"))?;
        let (owner, repo) = slug
            .split_once('/')
            .ok_or_else(|| err("repository must be owner/repo"))?;

        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            return Err(err("repository must be owner/repo"));
        }

        let number: u64 = number
            .parse()
            .map_err(|_| err("pull request number is not numeric"))?;
        if number == 0 {
            return Err(err("pull request number must be positive"));
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }
}

impl TryFrom<String> for ItemKey {
    type Error = ItemKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemKey> for String {
    fn from(key: ItemKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Lifecycle state of a pull request on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemState {
    Open,
    Closed,
    Merged,
}

impl ItemState {
    /// Parse the host's state string (`OPEN`, `CLOSED`, `MERGED`).
    ///
    /// Unknown values are treated as open so they still reach the decision logic.
    #[must_use]
    pub fn from_host(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "MERGED" => Self::Merged,
            "CLOSED" => Self::Closed,
            _ => Self::Open,
        }
    }
}

/// Mergeability of a pull request against its base branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeState {
    Mergeable,
    Conflicting,
    Indeterminate,
}

impl MergeState {
    /// Parse the host's mergeability string.
    ///
    /// Anything other than `MERGEABLE` or `CONFLICTING` (including `UNKNOWN`
    /// while the host is still computing it) is `Indeterminate`.
    #[must_use]
    pub fn from_host(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "MERGEABLE" => Self::Mergeable,
            "CONFLICTING" => Self::Conflicting,
            _ => Self::Indeterminate,
        }
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mergeable => "mergeable",
            Self::Conflicting => "conflicting",
            Self::Indeterminate => "indeterminate",
        };
        f.write_str(s)
    }
}

/// Externally observed status of a pull request at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStatus {
    pub state: ItemState,
    pub merge_state: MergeState,
    /// Tip commit of the head branch.
    pub head_revision: String,
    /// Head branch name.
    pub head_ref: String,
    /// Base branch name.
    pub base_ref: String,
    /// Highest comment cursor on the pull request, if any.
    pub latest_comment_id: Option<u64>,
    pub is_draft: bool,
}

/// A review or conversation comment to be addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// Host identifier, shown to the agent.
    pub id: u64,
    /// Ordering key compared against the waterline. Increases across every
    /// comment kind on the pull request.
    pub cursor: u64,
    pub author: String,
    /// `path:line` for inline review comments, `conversation` otherwise.
    pub location: String,
    pub body: String,
}

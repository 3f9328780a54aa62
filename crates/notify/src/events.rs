//! Notification event types for pull request reconciliation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
}

impl Severity {
    /// Get the Slack attachment color for this severity.
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",    // Blue
            Self::Warning => "#f39c12", // Orange
        }
    }

    /// Get the ntfy priority (1-5) for this severity.
    #[must_use]
    pub const fn ntfy_priority(&self) -> u8 {
        match self {
            Self::Info => 3,
            Self::Warning => 4,
        }
    }

    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
        }
    }
}

/// Events that can trigger notifications.
///
/// `item` is the canonical `owner/repo#number` key of the pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A tracked pull request was observed merged for the first time
    PullRequestMerged {
        item: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Review comments were addressed and the pull request went back to draft
    ReviewsAddressed {
        item: String,
        comment_count: usize,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Merge conflicts were resolved on the pull request's head branch
    ConflictsResolved {
        item: String,
        head_ref: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::PullRequestMerged { item, .. } => format!("Merged: {item}"),
            Self::ReviewsAddressed {
                item,
                comment_count,
                ..
            } => {
                let noun = if *comment_count == 1 {
                    "comment"
                } else {
                    "comments"
                };
                format!("Addressed {comment_count} review {noun}: {item}")
            }
            Self::ConflictsResolved { item, .. } => format!("Conflicts resolved: {item}"),
        }
    }

    /// Get a one-line human description of the event.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::PullRequestMerged { item, .. } => {
                format!("`{item}` has been merged. No further remediation will run.")
            }
            Self::ReviewsAddressed { item, .. } => {
                format!("`{item}` was converted to draft and is waiting for your review.")
            }
            Self::ConflictsResolved { item, head_ref, .. } => {
                format!("Rebased `{head_ref}` for `{item}`; please verify the result.")
            }
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::PullRequestMerged { .. } => Severity::Info,
            Self::ReviewsAddressed { .. } | Self::ConflictsResolved { .. } => Severity::Warning,
        }
    }

    /// Get the item key this event refers to.
    #[must_use]
    pub fn item(&self) -> &str {
        match self {
            Self::PullRequestMerged { item, .. }
            | Self::ReviewsAddressed { item, .. }
            | Self::ConflictsResolved { item, .. } => item,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::PullRequestMerged { timestamp, .. }
            | Self::ReviewsAddressed { timestamp, .. }
            | Self::ConflictsResolved { timestamp, .. } => *timestamp,
        }
    }
}

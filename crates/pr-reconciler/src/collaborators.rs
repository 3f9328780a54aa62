//! Capabilities the reconciler consumes.
//!
//! Each trait is a thin seam over an external system (the code host, the
//! agent CLI, notification channels). The reconciler only sees these traits,
//! so cycles can be driven against in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::types::{ItemKey, ItemStatus, ReviewComment};

/// Result of a remediation action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failure { detail: String },
}

impl ActionOutcome {
    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self::Failure {
            detail: detail.into(),
        }
    }
}

/// Reads the current status of a pull request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusProvider: Send + Sync {
    /// `Ok(None)` when the item no longer exists on the host.
    async fn get_status(&self, item: &ItemKey) -> Result<Option<ItemStatus>>;
}

/// Fetches review comments.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Comments with an id strictly greater than `waterline`, ascending by id.
    async fn get_comments_after(
        &self,
        item: &ItemKey,
        waterline: Option<u64>,
    ) -> Result<Vec<ReviewComment>>;
}

/// Performs remediation. An `Err` and a `Failure` are handled identically.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn resolve_conflicts(
        &self,
        item: &ItemKey,
        head_ref: &str,
        base_ref: &str,
    ) -> Result<ActionOutcome>;

    async fn address_reviews(
        &self,
        item: &ItemKey,
        head_ref: &str,
        comments: &[ReviewComment],
    ) -> Result<ActionOutcome>;
}

/// Converts a pull request back to draft after its reviews were addressed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DraftControl: Send + Sync {
    async fn convert_to_draft(&self, item: &ItemKey) -> Result<()>;
}

/// Best-effort notifications. Implementations swallow and log their own errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_merged(&self, item: &ItemKey);

    async fn notify_reviews_addressed(&self, item: &ItemKey, count: usize);

    async fn notify_conflicts_resolved(&self, item: &ItemKey, head_ref: &str);
}

/// Supplies the items to reconcile each cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Discovery: Send + Sync {
    async fn list_tracked_items(&self) -> Result<BTreeSet<ItemKey>>;
}

/// The full set of collaborators a [`crate::Reconciler`] drives.
#[derive(Clone)]
pub struct Collaborators {
    pub status: Arc<dyn StatusProvider>,
    pub comments: Arc<dyn CommentSource>,
    pub executor: Arc<dyn ActionExecutor>,
    pub drafts: Arc<dyn DraftControl>,
    pub notifier: Arc<dyn NotificationSink>,
    pub discovery: Arc<dyn Discovery>,
}

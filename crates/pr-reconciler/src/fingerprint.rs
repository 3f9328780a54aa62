//! Immutable snapshots of a pull request's observed state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{ItemKey, ItemStatus, MergeState};

/// Snapshot of one tracked item at one observation instant.
///
/// `observed_at` is informational only; equality and every decision ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub head_revision: String,
    pub merge_state: MergeState,
    pub is_draft: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_comment_id: Option<u64>,
    pub observed_at: DateTime<Utc>,
}

impl Fingerprint {
    /// Capture a fingerprint from a freshly fetched status.
    #[must_use]
    pub fn capture(item: &ItemKey, status: &ItemStatus, latest_comment_id: Option<u64>) -> Self {
        trace!(
            item = %item,
            head = %status.head_revision,
            merge_state = %status.merge_state,
            "Capturing fingerprint"
        );

        Self {
            head_revision: status.head_revision.clone(),
            merge_state: status.merge_state,
            is_draft: status.is_draft,
            latest_comment_id,
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_conflicting(&self) -> bool {
        self.merge_state == MergeState::Conflicting
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.head_revision == other.head_revision
            && self.merge_state == other.merge_state
            && self.is_draft == other.is_draft
            && self.latest_comment_id == other.latest_comment_id
    }
}

impl Eq for Fingerprint {}

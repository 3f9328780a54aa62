//! The reconciliation cycle.
//!
//! One cycle walks the working set strictly in order, classifies each item
//! against the store, runs at most one remediation per item, and records it
//! only after the action reports success. A failed action leaves the store
//! untouched so the same decision is recomputed next cycle. The store is
//! persisted once, at the end, if anything changed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{ActionOutcome, Collaborators};
use crate::decision::{decide, Decision, ProtectedBranches};
use crate::fingerprint::Fingerprint;
use crate::store::StateStore;
use crate::types::{ItemKey, ItemStatus};

/// Remediation kinds, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ResolveConflicts,
    AddressReviews,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolveConflicts => f.write_str("resolve-conflicts"),
            Self::AddressReviews => f.write_str("address-reviews"),
        }
    }
}

/// What happened to one item during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// First observation as merged; notification sent and recorded.
    MergedNotified,
    AlreadyMerged,
    Closed,
    /// The host no longer knows the item.
    Missing,
    Draft,
    ConflictsResolved,
    ConflictBlocked {
        branch: String,
    },
    ConflictUnchanged,
    ReviewsAddressed {
        count: usize,
        waterline: u64,
    },
    /// Reviews looked due but no comment above the waterline materialized.
    NoNewComments,
    Indeterminate,
    UpToDate,
    /// The executor ran and reported failure.
    ActionFailed {
        action: ActionKind,
        detail: String,
    },
    /// A collaborator errored while processing the item.
    Failed {
        error: String,
    },
}

impl ItemOutcome {
    /// Whether a remediation completed for this item.
    #[must_use]
    pub fn is_remediation(&self) -> bool {
        matches!(self, Self::ConflictsResolved | Self::ReviewsAddressed { .. })
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::ActionFailed { .. } | Self::Failed { .. })
    }
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Outcomes in processing order.
    pub outcomes: Vec<(ItemKey, ItemOutcome)>,
    /// Size of the working set, including items skipped by cancellation.
    pub items_seen: usize,
    /// The store was written at the end of the cycle.
    pub persisted: bool,
    /// Cancellation stopped the cycle before the working set was exhausted.
    pub cancelled: bool,
    /// Discovery failed and only stored items were reconciled.
    pub discovery_failed: bool,
}

impl CycleReport {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            outcomes: Vec::new(),
            items_seen: 0,
            persisted: false,
            cancelled: false,
            discovery_failed: false,
        }
    }

    #[must_use]
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn remediated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_remediation())
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }

    /// Outcome recorded for `key`, if it was processed.
    #[must_use]
    pub fn outcome(&self, key: &ItemKey) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, o)| o)
    }
}

/// Drives reconciliation cycles against a set of collaborators.
pub struct Reconciler {
    collaborators: Collaborators,
    guard: ProtectedBranches,
    state_path: PathBuf,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        guard: ProtectedBranches,
        state_path: PathBuf,
    ) -> Self {
        Self {
            collaborators,
            guard,
            state_path,
        }
    }

    /// Run one cycle over the working set.
    ///
    /// Never fails: per-item errors are recorded in the report, and a failed
    /// save leaves the store dirty for the next cycle to retry.
    pub async fn run_cycle(
        &self,
        store: &mut StateStore,
        cancel: &CancellationToken,
    ) -> CycleReport {
        let mut report = CycleReport::new();
        info!(tracked = store.len(), "Starting reconciliation cycle");

        let items = self.working_set(store, &mut report).await;
        report.items_seen = items.len();

        for key in items {
            if cancel.is_cancelled() {
                info!(
                    remaining = report.items_seen - report.processed(),
                    "Cancellation requested, stopping cycle early"
                );
                report.cancelled = true;
                break;
            }

            let outcome = match self.process_item(store, &key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(item = %key, error = %format!("{e:#}"), "Failed to process item");
                    ItemOutcome::Failed {
                        error: format!("{e:#}"),
                    }
                }
            };
            debug!(item = %key, outcome = ?outcome, "Item processed");
            report.outcomes.push((key, outcome));
        }

        if store.is_dirty() {
            match store.save(&self.state_path) {
                Ok(()) => report.persisted = true,
                Err(e) => error!(error = %e, "Failed to persist state, will retry next cycle"),
            }
        }

        report.finished_at = Utc::now();
        info!(
            items = report.items_seen,
            processed = report.processed(),
            remediated = report.remediated(),
            failed = report.failed(),
            persisted = report.persisted,
            cancelled = report.cancelled,
            duration_ms = (report.finished_at - report.started_at).num_milliseconds(),
            "Reconciliation cycle complete"
        );
        report
    }

    /// Discovered items plus stored items not yet confirmed merged.
    async fn working_set(&self, store: &StateStore, report: &mut CycleReport) -> Vec<ItemKey> {
        let mut items: BTreeSet<ItemKey> =
            match self.collaborators.discovery.list_tracked_items().await {
                Ok(items) => items,
                Err(e) => {
                    warn!(
                        error = %format!("{e:#}"),
                        "Discovery failed, reconciling stored items only"
                    );
                    report.discovery_failed = true;
                    BTreeSet::new()
                }
            };
        items.extend(store.unmerged_keys());
        items.into_iter().collect()
    }

    async fn process_item(&self, store: &mut StateStore, key: &ItemKey) -> Result<ItemOutcome> {
        let Some(status) = self
            .collaborators
            .status
            .get_status(key)
            .await
            .with_context(|| format!("failed to fetch status for {key}"))?
        else {
            debug!(item = %key, "Item not found on host, skipping");
            return Ok(ItemOutcome::Missing);
        };

        let fingerprint = Fingerprint::capture(key, &status, status.latest_comment_id);
        let state = store.observe(key);
        let waterline = state.last_addressed_comment_id;
        let decision = decide(&status, &fingerprint, state, &self.guard);
        debug!(item = %key, phase = ?decision.phase(), decision = ?decision, "Classified item");

        match decision {
            Decision::NotifyMerged => {
                info!(item = %key, "Item merged");
                self.collaborators.notifier.notify_merged(key).await;
                store.record_merged(key, Utc::now());
                Ok(ItemOutcome::MergedNotified)
            }
            Decision::AlreadyMerged => Ok(ItemOutcome::AlreadyMerged),
            Decision::Closed => {
                debug!(item = %key, "Item closed without merging, skipping");
                Ok(ItemOutcome::Closed)
            }
            Decision::Draft => {
                debug!(item = %key, "Item is a draft, waiting for a human");
                Ok(ItemOutcome::Draft)
            }
            Decision::ResolveConflicts => {
                self.resolve_conflicts(store, key, &status, fingerprint)
                    .await
            }
            Decision::ConflictBlocked { branch } => {
                warn!(
                    item = %key,
                    branch = %branch,
                    "Refusing to resolve conflicts on a protected branch"
                );
                Ok(ItemOutcome::ConflictBlocked { branch })
            }
            Decision::ConflictUnchanged => {
                debug!(
                    item = %key,
                    head = %fingerprint.head_revision,
                    "Conflict already handled for this head"
                );
                Ok(ItemOutcome::ConflictUnchanged)
            }
            Decision::CheckReviews => {
                self.address_reviews(store, key, &status, fingerprint, waterline)
                    .await
            }
            Decision::Idle {
                indeterminate: true,
            } => {
                debug!(item = %key, "Merge state indeterminate, no actionable work");
                Ok(ItemOutcome::Indeterminate)
            }
            Decision::Idle {
                indeterminate: false,
            } => Ok(ItemOutcome::UpToDate),
        }
    }

    async fn resolve_conflicts(
        &self,
        store: &mut StateStore,
        key: &ItemKey,
        status: &ItemStatus,
        fingerprint: Fingerprint,
    ) -> Result<ItemOutcome> {
        info!(
            item = %key,
            head = %status.head_ref,
            base = %status.base_ref,
            revision = %fingerprint.head_revision,
            "Resolving merge conflicts"
        );

        let outcome = self
            .collaborators
            .executor
            .resolve_conflicts(key, &status.head_ref, &status.base_ref)
            .await
            .with_context(|| format!("conflict resolution for {key} did not run"))?;

        match outcome {
            ActionOutcome::Success => {
                store.record_conflicts_resolved(key, fingerprint, Utc::now());
                info!(item = %key, "Conflicts resolved");
                self.collaborators
                    .notifier
                    .notify_conflicts_resolved(key, &status.head_ref)
                    .await;
                Ok(ItemOutcome::ConflictsResolved)
            }
            ActionOutcome::Failure { detail } => {
                warn!(item = %key, detail = %detail, "Conflict resolution failed");
                Ok(ItemOutcome::ActionFailed {
                    action: ActionKind::ResolveConflicts,
                    detail,
                })
            }
        }
    }

    async fn address_reviews(
        &self,
        store: &mut StateStore,
        key: &ItemKey,
        status: &ItemStatus,
        fingerprint: Fingerprint,
        waterline: Option<u64>,
    ) -> Result<ItemOutcome> {
        let comments: Vec<_> = self
            .collaborators
            .comments
            .get_comments_after(key, waterline)
            .await
            .with_context(|| format!("failed to fetch comments for {key}"))?
            .into_iter()
            .filter(|c| !waterline.is_some_and(|w| c.cursor <= w))
            .collect();

        let Some(addressed_up_to) = comments.iter().map(|c| c.cursor).max() else {
            debug!(item = %key, waterline = ?waterline, "No comments above waterline");
            return Ok(ItemOutcome::NoNewComments);
        };

        info!(
            item = %key,
            count = comments.len(),
            waterline = ?waterline,
            "Addressing review comments"
        );

        let outcome = self
            .collaborators
            .executor
            .address_reviews(key, &status.head_ref, &comments)
            .await
            .with_context(|| format!("review resolution for {key} did not run"))?;

        match outcome {
            ActionOutcome::Success => {
                store.record_reviews_addressed(key, fingerprint, addressed_up_to, Utc::now());
                info!(item = %key, waterline = addressed_up_to, "Review comments addressed");

                if let Err(e) = self.collaborators.drafts.convert_to_draft(key).await {
                    warn!(item = %key, error = %format!("{e:#}"), "Failed to convert to draft");
                }
                self.collaborators
                    .notifier
                    .notify_reviews_addressed(key, comments.len())
                    .await;

                Ok(ItemOutcome::ReviewsAddressed {
                    count: comments.len(),
                    waterline: addressed_up_to,
                })
            }
            ActionOutcome::Failure { detail } => {
                warn!(item = %key, detail = %detail, "Review resolution failed");
                Ok(ItemOutcome::ActionFailed {
                    action: ActionKind::AddressReviews,
                    detail,
                })
            }
        }
    }
}

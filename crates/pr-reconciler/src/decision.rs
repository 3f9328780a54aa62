//! Reconciliation decisions.
//!
//! Pure functions comparing a fresh [`Fingerprint`] against stored
//! [`ProcessedState`]. Nothing here performs I/O, so the whole priority
//! ladder a cycle walks for each item is covered by unit tests.

use std::collections::HashSet;

use crate::fingerprint::Fingerprint;
use crate::store::ProcessedState;
use crate::types::{ItemState, ItemStatus, MergeState};

/// Whether conflict resolution is due.
///
/// True when the item is conflicting and either it was never resolved, new
/// commits landed since the last resolution, or it was not conflicting when
/// last recorded. At most one attempt per distinct conflicting head.
#[must_use]
pub fn should_resolve_conflicts(fingerprint: &Fingerprint, state: &ProcessedState) -> bool {
    if fingerprint.merge_state != MergeState::Conflicting {
        return false;
    }

    match &state.last_conflict_fingerprint {
        None => true,
        Some(last) => {
            last.head_revision != fingerprint.head_revision
                || last.merge_state != MergeState::Conflicting
        }
    }
}

/// Whether there may be review comments above the waterline.
#[must_use]
pub fn should_address_reviews(latest_comment_id: Option<u64>, state: &ProcessedState) -> bool {
    match (latest_comment_id, state.last_addressed_comment_id) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(latest), Some(waterline)) => latest > waterline,
    }
}

/// Whether this is the first time the item is seen merged.
#[must_use]
pub fn is_first_seen_as_merged(state: &ProcessedState) -> bool {
    state.seen_as_merged_at.is_none()
}

/// Branch names that must never be rewritten automatically.
///
/// Matching is case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct ProtectedBranches {
    names: HashSet<String>,
}

impl ProtectedBranches {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_protected(&self, branch: &str) -> bool {
        self.names.contains(&branch.trim().to_lowercase())
    }
}

/// Per-cycle state of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPhase {
    /// Terminal.
    Merged,
    /// Closed without merging.
    Closed,
    /// Waiting on a human.
    Draft,
    ConflictPending,
    ReviewPending,
    UpToDate,
}

/// What the reconciler should do with an item this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Merged and never notified: notify, then record.
    NotifyMerged,
    /// Merged and already recorded.
    AlreadyMerged,
    /// Closed without merging.
    Closed,
    /// Draft: deferred to a human.
    Draft,
    /// Run conflict resolution.
    ResolveConflicts,
    /// Conflict resolution is due but the head branch is protected.
    ConflictBlocked { branch: String },
    /// Conflicting, but this head was already handled.
    ConflictUnchanged,
    /// Comments above the waterline may exist: fetch and address them.
    CheckReviews,
    /// Nothing to do. `indeterminate` is set when mergeability is unknown.
    Idle { indeterminate: bool },
}

impl Decision {
    #[must_use]
    pub fn phase(&self) -> ItemPhase {
        match self {
            Self::NotifyMerged | Self::AlreadyMerged => ItemPhase::Merged,
            Self::Closed => ItemPhase::Closed,
            Self::Draft => ItemPhase::Draft,
            Self::ResolveConflicts | Self::ConflictBlocked { .. } | Self::ConflictUnchanged => {
                ItemPhase::ConflictPending
            }
            Self::CheckReviews => ItemPhase::ReviewPending,
            Self::Idle { .. } => ItemPhase::UpToDate,
        }
    }
}

/// Classify an item, applying the rules in priority order: merged, closed,
/// draft, conflicts (with the protected-branch guard), then reviews.
///
/// An indeterminate merge state is never actionable; the host is usually
/// still computing mergeability and the next cycle sees a definite value.
#[must_use]
pub fn decide(
    status: &ItemStatus,
    fingerprint: &Fingerprint,
    state: &ProcessedState,
    guard: &ProtectedBranches,
) -> Decision {
    match status.state {
        ItemState::Merged => {
            return if is_first_seen_as_merged(state) {
                Decision::NotifyMerged
            } else {
                Decision::AlreadyMerged
            };
        }
        ItemState::Closed => return Decision::Closed,
        ItemState::Open => {}
    }

    if status.is_draft {
        return Decision::Draft;
    }

    match fingerprint.merge_state {
        MergeState::Conflicting => {
            if !should_resolve_conflicts(fingerprint, state) {
                Decision::ConflictUnchanged
            } else if guard.is_protected(&status.head_ref) {
                Decision::ConflictBlocked {
                    branch: status.head_ref.clone(),
                }
            } else {
                Decision::ResolveConflicts
            }
        }
        // Unknown mergeability is idle for both remediations, reviews
        // included, until the host reports a settled state.
        MergeState::Indeterminate => Decision::Idle {
            indeterminate: true,
        },
        MergeState::Mergeable => {
            if should_address_reviews(fingerprint.latest_comment_id, state) {
                Decision::CheckReviews
            } else {
                Decision::Idle {
                    indeterminate: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemKey;
    use chrono::Utc;

    fn key() -> ItemKey {
        "acme/widgets#7".parse().unwrap()
    }

    fn status(head: &str, merge_state: MergeState, latest: Option<u64>) -> ItemStatus {
        ItemStatus {
            state: ItemState::Open,
            merge_state,
            head_revision: head.to_string(),
            head_ref: "feature/login".to_string(),
            base_ref: "main".to_string(),
            latest_comment_id: latest,
            is_draft: false,
        }
    }

    fn capture(status: &ItemStatus) -> Fingerprint {
        Fingerprint::capture(&key(), status, status.latest_comment_id)
    }

    fn guard() -> ProtectedBranches {
        ProtectedBranches::new(["main", "Develop"])
    }

    #[test]
    fn test_new_conflicting_item_resolves_once() {
        let mut state = ProcessedState::new(key());
        let fp = capture(&status("abc123", MergeState::Conflicting, None));

        assert!(should_resolve_conflicts(&fp, &state));

        state.last_conflict_fingerprint = Some(fp.clone());
        assert!(!should_resolve_conflicts(&fp, &state));
    }

    #[test]
    fn test_new_head_while_conflicting_retriggers() {
        let mut state = ProcessedState::new(key());
        state.last_conflict_fingerprint =
            Some(capture(&status("abc123", MergeState::Conflicting, None)));

        let fp = capture(&status("def456", MergeState::Conflicting, None));
        assert!(should_resolve_conflicts(&fp, &state));
    }

    #[test]
    fn test_flip_back_into_conflict_retriggers() {
        let mut state = ProcessedState::new(key());
        state.last_conflict_fingerprint =
            Some(capture(&status("abc123", MergeState::Mergeable, None)));

        let fp = capture(&status("abc123", MergeState::Conflicting, None));
        assert!(should_resolve_conflicts(&fp, &state));
    }

    #[test]
    fn test_not_conflicting_never_resolves() {
        let state = ProcessedState::new(key());
        for merge_state in [MergeState::Mergeable, MergeState::Indeterminate] {
            let fp = capture(&status("abc123", merge_state, None));
            assert!(!should_resolve_conflicts(&fp, &state));
        }
    }

    #[test]
    fn test_waterline_scenario() {
        let mut state = ProcessedState::new(key());
        assert!(should_address_reviews(Some(50), &state));

        state.last_addressed_comment_id = Some(50);
        assert!(!should_address_reviews(Some(50), &state));
        assert!(should_address_reviews(Some(75), &state));
    }

    #[test]
    fn test_waterline_is_monotonic_cursor() {
        let mut state = ProcessedState::new(key());
        state.last_addressed_comment_id = Some(100);
        for latest in 0..=100 {
            assert!(!should_address_reviews(Some(latest), &state), "id {latest}");
        }
        for latest in 101..=150 {
            assert!(should_address_reviews(Some(latest), &state), "id {latest}");
        }
    }

    #[test]
    fn test_no_comments_never_addresses() {
        let mut state = ProcessedState::new(key());
        assert!(!should_address_reviews(None, &state));
        state.last_addressed_comment_id = Some(0);
        assert!(!should_address_reviews(None, &state));
        assert!(should_address_reviews(Some(1), &state));
    }

    #[test]
    fn test_evaluation_is_idempotent_once_recorded() {
        let s = status("abc123", MergeState::Conflicting, Some(50));
        let fp = capture(&s);
        let mut state = ProcessedState::new(key());
        state.last_conflict_fingerprint = Some(fp.clone());
        state.last_addressed_comment_id = Some(50);

        for _ in 0..2 {
            assert!(!should_resolve_conflicts(&fp, &state));
            assert!(!should_address_reviews(fp.latest_comment_id, &state));
        }
    }

    #[test]
    fn test_merge_fires_once() {
        let mut state = ProcessedState::new(key());
        assert!(is_first_seen_as_merged(&state));
        state.seen_as_merged_at = Some(Utc::now());
        assert!(!is_first_seen_as_merged(&state));
        assert!(!is_first_seen_as_merged(&state));
    }

    #[test]
    fn test_protected_branches_case_insensitive() {
        let guard = guard();
        assert!(guard.is_protected("main"));
        assert!(guard.is_protected("MAIN"));
        assert!(guard.is_protected("develop"));
        assert!(!guard.is_protected("feature/main"));
        assert!(!ProtectedBranches::default().is_protected("main"));
    }

    #[test]
    fn test_decide_merged_takes_priority() {
        let mut s = status("abc123", MergeState::Conflicting, Some(9));
        s.state = ItemState::Merged;
        s.is_draft = true;
        let fp = capture(&s);
        let mut state = ProcessedState::new(key());

        assert_eq!(decide(&s, &fp, &state, &guard()), Decision::NotifyMerged);
        state.seen_as_merged_at = Some(Utc::now());
        let decision = decide(&s, &fp, &state, &guard());
        assert_eq!(decision, Decision::AlreadyMerged);
        assert_eq!(decision.phase(), ItemPhase::Merged);
    }

    #[test]
    fn test_decide_closed_is_noop() {
        let mut s = status("abc123", MergeState::Conflicting, Some(9));
        s.state = ItemState::Closed;
        let fp = capture(&s);
        let state = ProcessedState::new(key());
        assert_eq!(decide(&s, &fp, &state, &guard()), Decision::Closed);
    }

    #[test]
    fn test_decide_draft_defers_everything() {
        let mut s = status("abc123", MergeState::Conflicting, Some(9));
        s.is_draft = true;
        let fp = capture(&s);
        let state = ProcessedState::new(key());

        assert!(should_resolve_conflicts(&fp, &state));
        assert_eq!(decide(&s, &fp, &state, &guard()), Decision::Draft);
    }

    #[test]
    fn test_decide_conflict_before_reviews() {
        let s = status("abc123", MergeState::Conflicting, Some(9));
        let fp = capture(&s);
        let state = ProcessedState::new(key());

        let decision = decide(&s, &fp, &state, &guard());
        assert_eq!(decision, Decision::ResolveConflicts);
        assert_eq!(decision.phase(), ItemPhase::ConflictPending);
    }

    #[test]
    fn test_decide_conflict_unchanged_skips_reviews() {
        let s = status("abc123", MergeState::Conflicting, Some(9));
        let fp = capture(&s);
        let mut state = ProcessedState::new(key());
        state.last_conflict_fingerprint = Some(fp.clone());

        assert_eq!(
            decide(&s, &fp, &state, &guard()),
            Decision::ConflictUnchanged
        );
    }

    #[test]
    fn test_decide_protected_head_is_blocked() {
        let mut s = status("abc123", MergeState::Conflicting, None);
        s.head_ref = "Main".to_string();
        let fp = capture(&s);
        let state = ProcessedState::new(key());

        assert_eq!(
            decide(&s, &fp, &state, &guard()),
            Decision::ConflictBlocked {
                branch: "Main".to_string()
            }
        );
    }

    #[test]
    fn test_decide_indeterminate_is_idle() {
        let s = status("abc123", MergeState::Indeterminate, Some(9));
        let fp = capture(&s);
        let state = ProcessedState::new(key());

        assert_eq!(
            decide(&s, &fp, &state, &guard()),
            Decision::Idle {
                indeterminate: true
            }
        );
    }

    #[test]
    fn test_decide_reviews_then_up_to_date() {
        let s = status("abc123", MergeState::Mergeable, Some(9));
        let fp = capture(&s);
        let mut state = ProcessedState::new(key());

        let decision = decide(&s, &fp, &state, &guard());
        assert_eq!(decision, Decision::CheckReviews);
        assert_eq!(decision.phase(), ItemPhase::ReviewPending);

        state.last_addressed_comment_id = Some(9);
        let decision = decide(&s, &fp, &state, &guard());
        assert_eq!(
            decision,
            Decision::Idle {
                indeterminate: false
            }
        );
        assert_eq!(decision.phase(), ItemPhase::UpToDate);
    }
}

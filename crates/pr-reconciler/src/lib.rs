//! Pull request reconciler.
//!
//! Periodically inspects a set of open pull requests and drives each one
//! toward a mergeable, review-clean state by handing merge conflicts and
//! unaddressed review comments to a coding agent. Every remediation is keyed
//! to a fingerprint of the pull request's observable state and recorded in a
//! durable store, so the same state is never acted on twice, even across
//! restarts.
//!
//! The core ([`Reconciler`], [`decide`], [`StateStore`]) depends only on the
//! traits in [`collaborators`]; [`github`], [`agent`] and [`notifications`]
//! provide the production implementations.

#![warn(clippy::pedantic)]

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod github;
pub mod notifications;
pub mod reconciler;
pub mod scheduler;
pub mod store;
pub mod types;

pub use agent::AgentExecutor;
pub use collaborators::{
    ActionExecutor, ActionOutcome, Collaborators, CommentSource, Discovery, DraftControl,
    NotificationSink, StatusProvider,
};
pub use config::{AgentConfig, Config};
pub use decision::{
    decide, is_first_seen_as_merged, should_address_reviews, should_resolve_conflicts, Decision,
    ItemPhase, ProtectedBranches,
};
pub use error::{ConfigError, StoreError};
pub use fingerprint::Fingerprint;
pub use github::GhCli;
pub use notifications::NotifierSink;
pub use reconciler::{ActionKind, CycleReport, ItemOutcome, Reconciler};
pub use scheduler::Scheduler;
pub use store::{ProcessedState, StateStore, STATE_VERSION};
pub use types::{ItemKey, ItemKeyError, ItemState, ItemStatus, MergeState, ReviewComment};

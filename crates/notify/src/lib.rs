//! Notification system for pull request reconciliation events.
//!
//! This crate provides a best-effort notification system for telling a
//! human when the reconciler has done something on their behalf: a tracked
//! pull request merged, review comments were addressed, or a conflict was
//! resolved.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn run() {
//! // Create notifier from environment variables
//! let notifier = Notifier::from_env();
//!
//! // Send a notification and inspect per-channel results
//! let results = notifier
//!     .notify_and_wait(NotifyEvent::PullRequestMerged {
//!         item: "acme/widgets#42".to_string(),
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await;
//! for (channel, result) in results {
//!     if let Err(e) = result {
//!         eprintln!("{channel}: {e}");
//!     }
//! }
//! # }
//! ```
//!
//! # Configuration
//!
//! The notifier is configured via environment variables:
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming webhook (enables Slack channel)
//! - `NTFY_TOPIC_URL`: ntfy topic URL (enables push notifications)
//! - `NTFY_TOKEN`: optional ntfy access token
//! - `NOTIFY_DISABLED`: Set to "true" to disable all notifications

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::ntfy::NtfyChannel;
pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` manages multiple notification channels and dispatches
/// events to all of them.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a new notifier from environment variables.
    ///
    /// This will auto-detect which channels are configured based on
    /// environment variables and enable them accordingly.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self::disabled();
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        let ntfy = NtfyChannel::from_env();
        if ntfy.enabled() {
            info!("ntfy notifications enabled");
            channels.push(Arc::new(ntfy));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification to every channel in turn and collect the results.
    ///
    /// Errors are returned per channel, never propagated.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if self.disabled || self.channels.is_empty() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.has_channels());
        assert_eq!(notifier.channel_count(), 0);
    }

    #[test]
    fn test_severity_colors() {
        assert_eq!(Severity::Info.color(), "#3498db");
        assert_eq!(Severity::Warning.color(), "#f39c12");
    }

    #[test]
    fn test_event_titles() {
        let event = NotifyEvent::PullRequestMerged {
            item: "acme/widgets#42".to_string(),
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.title(), "Merged: acme/widgets#42");
        assert_eq!(event.severity(), Severity::Info);

        let event = NotifyEvent::ReviewsAddressed {
            item: "acme/widgets#42".to_string(),
            comment_count: 1,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(event.title(), "Addressed 1 review comment: acme/widgets#42");
        assert_eq!(event.severity(), Severity::Warning);
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = NotifyEvent::ConflictsResolved {
            item: "acme/widgets#42".to_string(),
            head_ref: "feature/login".to_string(),
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conflicts_resolved");
        assert_eq!(json["head_ref"], "feature/login");
    }

    #[tokio::test]
    async fn test_notify_and_wait_collects_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let notifier = Notifier::with_channels(vec![
            Arc::new(SlackChannel::new(server.uri())),
            Arc::new(NtfyChannel::new(server.uri(), None)),
        ]);
        let results = notifier
            .notify_and_wait(NotifyEvent::PullRequestMerged {
                item: "acme/widgets#42".to_string(),
                timestamp: chrono::Utc::now(),
            })
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "slack");
        assert_eq!(results[1].0, "ntfy");
        assert!(results.iter().all(|(_, r)| r.is_err()));
    }
}

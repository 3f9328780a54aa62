//! [`NotificationSink`] backed by the `notify` crate.

use async_trait::async_trait;
use chrono::Utc;
use notify::{Notifier, NotifyEvent};
use tracing::{debug, warn};

use crate::collaborators::NotificationSink;
use crate::types::ItemKey;

/// Delivers reconciler events to every configured notify channel.
///
/// Delivery is awaited so a `--once` run does not exit with sends in flight,
/// but failures are only logged.
pub struct NotifierSink {
    notifier: Notifier,
}

impl NotifierSink {
    #[must_use]
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    async fn deliver(&self, event: NotifyEvent) {
        if !self.notifier.has_channels() {
            debug!(title = %event.title(), "No notification channels, dropping event");
            return;
        }

        for (channel, result) in self.notifier.notify_and_wait(event).await {
            if let Err(e) = result {
                warn!(channel = %channel, error = %e, "Notification delivery failed");
            }
        }
    }
}

#[async_trait]
impl NotificationSink for NotifierSink {
    async fn notify_merged(&self, item: &ItemKey) {
        self.deliver(NotifyEvent::PullRequestMerged {
            item: item.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn notify_reviews_addressed(&self, item: &ItemKey, count: usize) {
        self.deliver(NotifyEvent::ReviewsAddressed {
            item: item.to_string(),
            comment_count: count,
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn notify_conflicts_resolved(&self, item: &ItemKey, head_ref: &str) {
        self.deliver(NotifyEvent::ConflictsResolved {
            item: item.to_string(),
            head_ref: head_ref.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::{ChannelError, NotifyChannel};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingChannel {
        events: Mutex<Vec<NotifyEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotifyChannel for RecordingChannel {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(ChannelError::NotConfigured("recording".to_string()));
            }
            Ok(())
        }
    }

    fn sink_for(channel: &Arc<RecordingChannel>) -> NotifierSink {
        let channel: Arc<dyn NotifyChannel> = channel.clone();
        NotifierSink::new(Notifier::with_channels(vec![channel]))
    }

    fn key() -> ItemKey {
        "acme/widgets#7".parse().unwrap()
    }

    #[tokio::test]
    async fn test_events_reach_channel() {
        let channel = Arc::new(RecordingChannel::default());
        let sink = sink_for(&channel);

        sink.notify_merged(&key()).await;
        sink.notify_reviews_addressed(&key(), 3).await;
        sink.notify_conflicts_resolved(&key(), "feature/login").await;

        let events = channel.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            NotifyEvent::PullRequestMerged { item, .. } if item == "acme/widgets#7"
        ));
        assert!(matches!(
            &events[1],
            NotifyEvent::ReviewsAddressed {
                comment_count: 3,
                ..
            }
        ));
        assert!(matches!(
            &events[2],
            NotifyEvent::ConflictsResolved { head_ref, .. } if head_ref == "feature/login"
        ));
    }

    #[tokio::test]
    async fn test_channel_failure_is_swallowed() {
        let channel = Arc::new(RecordingChannel {
            fail: true,
            ..RecordingChannel::default()
        });
        let sink = sink_for(&channel);

        sink.notify_merged(&key()).await;
        assert_eq!(channel.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_notifier_is_silent() {
        let sink = NotifierSink::new(Notifier::disabled());
        sink.notify_merged(&key()).await;
    }
}

//! ntfy push notification channel.
//!
//! Publishes a plain-text message to an ntfy topic URL
//! (e.g. `https://ntfy.sh/my-prs`), with title and priority carried in headers.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for the ntfy topic URL.
const ENV_NTFY_TOPIC_URL: &str = "NTFY_TOPIC_URL";

/// Environment variable for an optional ntfy access token.
const ENV_NTFY_TOKEN: &str = "NTFY_TOKEN";

/// ntfy push notification channel.
pub struct NtfyChannel {
    topic_url: Option<String>,
    token: Option<String>,
    client: reqwest::Client,
}

impl NtfyChannel {
    /// Create a new ntfy channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let topic_url = std::env::var(ENV_NTFY_TOPIC_URL)
            .ok()
            .filter(|url| !url.trim().is_empty());
        let token = std::env::var(ENV_NTFY_TOKEN)
            .ok()
            .filter(|t| !t.trim().is_empty());

        if topic_url.is_some() {
            debug!("ntfy notifications enabled");
        } else {
            debug!("ntfy notifications disabled (NTFY_TOPIC_URL not set)");
        }

        Self {
            topic_url,
            token,
            client: reqwest::Client::new(),
        }
    }

    /// Create an ntfy channel for a specific topic URL.
    #[must_use]
    pub fn new(topic_url: String, token: Option<String>) -> Self {
        Self {
            topic_url: Some(topic_url),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn tags(event: &NotifyEvent) -> &'static str {
        match event {
            NotifyEvent::PullRequestMerged { .. } => "tada",
            NotifyEvent::ReviewsAddressed { .. } => "memo",
            NotifyEvent::ConflictsResolved { .. } => "twisted_rightwards_arrows",
        }
    }
}

#[async_trait]
impl NotifyChannel for NtfyChannel {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    fn enabled(&self) -> bool {
        self.topic_url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let topic_url = self
            .topic_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured(ENV_NTFY_TOPIC_URL.to_string()))?;

        debug!(channel = "ntfy", event_type = ?event.title(), "Sending notification");

        let mut request = self
            .client
            .post(topic_url)
            .header("Title", event.title())
            .header("Priority", event.severity().ntfy_priority().to_string())
            .header("Tags", Self::tags(event))
            .body(event.description());

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if response.status().is_success() {
            debug!(channel = "ntfy", "Notification sent successfully");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            warn!(
                channel = "ntfy",
                status = %status,
                body = %body,
                "ntfy publish request failed"
            );

            Err(ChannelError::Rejected {
                channel: "ntfy",
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_sets_headers_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prs"))
            .and(header("Title", "Merged: acme/widgets#7"))
            .and(header("Priority", "3"))
            .and(header("Authorization", "Bearer tk_secret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = NtfyChannel::new(
            format!("{}/prs", server.uri()),
            Some("tk_secret".to_string()),
        );
        let event = NotifyEvent::PullRequestMerged {
            item: "acme/widgets#7".to_string(),
            timestamp: chrono::Utc::now(),
        };
        channel.send(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_channel_errors() {
        let channel = NtfyChannel {
            topic_url: None,
            token: None,
            client: reqwest::Client::new(),
        };
        assert!(!channel.enabled());
        let event = NotifyEvent::PullRequestMerged {
            item: "acme/widgets#7".to_string(),
            timestamp: chrono::Utc::now(),
        };
        assert!(matches!(
            channel.send(&event).await,
            Err(ChannelError::NotConfigured(_))
        ));
    }
}

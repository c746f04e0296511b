//! Generic webhook channel.
//!
//! Flux v2 `Receiver` endpoints (and most GitOps controllers) only care that a
//! request arrived, so the channel posts an empty JSON object and inspects the
//! response status alone.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Webhook notification channel.
pub struct WebhookChannel {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a webhook channel. `None` yields a disabled channel.
    #[must_use]
    pub fn new(url: Option<String>) -> Self {
        Self::with_client(url, reqwest::Client::new())
    }

    /// Create a webhook channel sharing an existing HTTP client.
    #[must_use]
    pub fn with_client(url: Option<String>, client: reqwest::Client) -> Self {
        let url = url.filter(|u| !u.trim().is_empty());
        Self { url, client }
    }

    /// The configured endpoint, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("notify url".to_string()))?;

        let NotifyEvent::ManifestCommitted {
            branch,
            commit_sha,
            rule,
            namespace,
            pod,
            ..
        } = event;
        debug!(
            channel = "webhook",
            url = %url,
            event = %event.title(),
            branch = %branch,
            commit = %commit_sha,
            rule = %rule,
            namespace = namespace.as_deref().unwrap_or_default(),
            pod = pod.as_deref().unwrap_or_default(),
            timestamp = %event.timestamp(),
            "Sending notification"
        );

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(channel = "webhook", status = status.as_u16(), "Notification accepted");
            Ok(())
        } else {
            warn!(
                channel = "webhook",
                url = %url,
                status = status.as_u16(),
                "Webhook request failed"
            );
            Err(ChannelError::Status {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn committed_event() -> NotifyEvent {
        NotifyEvent::ManifestCommitted {
            repository: "acme/deploy".to_string(),
            path: "apps/web.yaml".to_string(),
            branch: "main".to_string(),
            commit_sha: "abc123".to_string(),
            rule: "Terminal shell in container".to_string(),
            namespace: Some("default".to_string()),
            pod: Some("web-0".to_string()),
            timestamp: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_posts_empty_json_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook/flux"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(Some(format!("{}/hook/flux", server.uri())));
        assert!(channel.enabled());
        channel.send(&committed_event()).await.unwrap();
    }

    #[tokio::test]
    async fn test_any_2xx_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(Some(server.uri()));
        assert!(channel.send(&committed_event()).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let channel = WebhookChannel::new(Some(server.uri()));
        let err = channel.send(&committed_event()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Status { status: 503 }));
    }

    #[tokio::test]
    async fn test_unconfigured_channel() {
        let channel = WebhookChannel::new(Some("   ".to_string()));
        assert!(!channel.enabled());
        assert!(channel.url().is_none());

        let err = channel.send(&committed_event()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}

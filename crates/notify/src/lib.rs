//! Change notifications for downstream delivery controllers.
//!
//! After a manifest change lands in the repository, a GitOps controller such
//! as Flux v2 can be poked through its webhook receiver so it reconciles
//! immediately instead of waiting for the next poll interval.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! # async fn run() {
//! let notifier = Notifier::webhook(
//!     Some("http://notification-controller.flux-system/hook/abc".to_string()),
//!     reqwest::Client::new(),
//! );
//!
//! let results = notifier
//!     .notify_and_wait(NotifyEvent::ManifestCommitted {
//!         repository: "acme/deploy".to_string(),
//!         path: "apps/web.yaml".to_string(),
//!         branch: "main".to_string(),
//!         commit_sha: "abc123".to_string(),
//!         rule: "Terminal shell in container".to_string(),
//!         namespace: Some("default".to_string()),
//!         pod: Some("web-0".to_string()),
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await;
//! # let _ = results;
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`WebhookChannel`] posts an empty JSON body to a configured URL
//! - [`Notifier`] dispatches events to all enabled channels
//!
//! Notifications are advisory: a failed delivery is reported back to the
//! caller but never retried here.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::webhook::WebhookChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::NotifyEvent;

use std::sync::Arc;
use tracing::{debug, info};

/// Central notification dispatcher.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    /// Create a notifier with a single webhook channel.
    ///
    /// A missing or blank URL produces a notifier without channels.
    #[must_use]
    pub fn webhook(url: Option<String>, client: reqwest::Client) -> Self {
        let channel = WebhookChannel::with_client(url, client);
        if channel.enabled() {
            info!(
                url = channel.url().unwrap_or_default(),
                "Webhook notifications enabled"
            );
            let channel: Arc<dyn NotifyChannel> = Arc::new(channel);
            Self::with_channels(vec![channel])
        } else {
            debug!("No notification URL configured");
            Self::disabled()
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// Create a notifier without channels.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { channels: vec![] }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        self.channels.iter().any(|c| c.enabled())
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.iter().filter(|c| c.enabled()).count()
    }

    /// Send a notification and wait for all channels to complete.
    ///
    /// Errors are collected per channel and returned, never propagated.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(&'static str, Result<(), ChannelError>)> {
        let mut results = vec![];

        for channel in self.channels.iter().filter(|c| c.enabled()) {
            let result = channel.send(&event).await;
            if result.is_ok() {
                debug!(channel = channel.name(), "Notification sent");
            }
            results.push((channel.name(), result));
        }

        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::disabled()
    }
}

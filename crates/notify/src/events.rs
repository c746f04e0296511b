//! Notification event types for remediation changes.

use chrono::{DateTime, Utc};

/// Events that can trigger notifications.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// A manifest was committed after a workload was scaled to zero
    ManifestCommitted {
        /// `owner/name` of the repository holding the manifest
        repository: String,
        path: String,
        branch: String,
        commit_sha: String,
        rule: String,
        namespace: Option<String>,
        pod: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::ManifestCommitted {
                repository, path, ..
            } => format!("Manifest Committed: {repository}/{path}"),
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ManifestCommitted { timestamp, .. } => *timestamp,
        }
    }
}

//! Remediation Orchestrator
//!
//! Runs one alert through the scale-down pipeline:
//!
//! ```text
//! RECEIVED --not actionable--> SKIPPED
//! RECEIVED --> FETCHING --error--> FAILED
//! FETCHING --> MUTATING --schema error--> FAILED
//! MUTATING --> COMMITTING --conflict--> FAILED (no retry)
//! COMMITTING --auth/transient--> FAILED
//! COMMITTING --> NOTIFYING --any--> DONE
//! ```
//!
//! The commit is the point of no return. Fetch or mutation failures never
//! reach it, and whatever the notifier does afterwards the outcome stays
//! [`RemediationOutcome::Committed`].

use notify::{Notifier, NotifyEvent};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RemediatorConfig;
use crate::event::{self, AlertEvent, Workload};
use crate::manifest::{self, ManifestError};
use crate::repository::{CommitReceipt, CommitRequest, ManifestRepository, RepositoryError};

/// Why a pipeline run failed.
#[derive(Debug, Error)]
pub enum RemediationError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("malformed manifest: {0}")]
    Schema(#[from] ManifestError),
}

/// What happened to the change notification after a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStatus {
    Sent,
    Failed(String),
    NotConfigured,
}

/// Terminal state of one remediation attempt.
#[derive(Debug)]
pub enum RemediationOutcome {
    /// Event was not actionable; nothing remote was touched
    Skipped { reason: String },
    Committed {
        workload: Workload,
        rule: String,
        receipt: CommitReceipt,
        previous_replicas: Option<u64>,
        notification: NotificationStatus,
    },
    /// Another writer changed the manifest between fetch and commit
    Conflict {
        workload: Workload,
        rule: String,
        path: String,
    },
    /// Fetch, mutation or commit failed
    UpstreamError {
        workload: Workload,
        rule: String,
        error: RemediationError,
    },
}

impl RemediationOutcome {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Committed { .. } => "committed",
            Self::Conflict { .. } => "conflict",
            Self::UpstreamError { .. } => "upstream-error",
        }
    }

    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// Successful commit plus what the mutation replaced.
struct ScaleDown {
    receipt: CommitReceipt,
    previous_replicas: Option<u64>,
}

/// Composes validation, the repository client, the mutator and the notifier.
pub struct Orchestrator {
    config: Arc<RemediatorConfig>,
    repository: Arc<dyn ManifestRepository>,
    notifier: Notifier,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: Arc<RemediatorConfig>,
        repository: Arc<dyn ManifestRepository>,
        notifier: Notifier,
    ) -> Self {
        Self {
            config,
            repository,
            notifier,
        }
    }

    /// Run the pipeline for one alert. Never panics on remote failures; every
    /// failure becomes an outcome and is logged here.
    #[instrument(
        skip(self, event),
        fields(
            event_id = %event.id,
            rule = %event.rule,
            namespace = event.subject.namespace.as_deref().unwrap_or_default(),
            pod = event.subject.pod.as_deref().unwrap_or_default(),
        )
    )]
    pub async fn handle(&self, event: &AlertEvent) -> RemediationOutcome {
        if !event::accepts(event) {
            debug!(source = %event.source, event_type = %event.ty, "Alert not actionable");
            return RemediationOutcome::Skipped {
                reason: format!("rule `{}` is not actionable", event.rule),
            };
        }

        info!(priority = %event.priority, output = %event.output, "Remediating alert");

        let workload = event.subject.clone();
        let rule = event.rule.clone();

        let outcome = match self.scale_down().await {
            Ok(scaled) => {
                let notification = self.notify(event, &scaled.receipt).await;
                RemediationOutcome::Committed {
                    workload,
                    rule,
                    receipt: scaled.receipt,
                    previous_replicas: scaled.previous_replicas,
                    notification,
                }
            }
            Err(RemediationError::Repository(error)) if error.is_conflict() => {
                RemediationOutcome::Conflict {
                    workload,
                    rule,
                    path: self.config.path.clone(),
                }
            }
            Err(error) => RemediationOutcome::UpstreamError {
                workload,
                rule,
                error,
            },
        };

        self.log_outcome(&outcome);
        outcome
    }

    async fn scale_down(&self) -> Result<ScaleDown, RemediationError> {
        let config = &self.config;

        let snapshot = self
            .repository
            .fetch(&config.repository, &config.path, &config.reference)
            .await?;

        let scaled = manifest::set_replicas_to_zero(&snapshot.content)?;
        if scaled.was_already_zero() {
            debug!(path = %config.path, "Manifest already at zero replicas");
        }

        let request = CommitRequest {
            path: config.path.clone(),
            branch: config.reference.clone(),
            content: scaled.content,
            expected_version: snapshot.version,
            message: config.commit_message.clone(),
            author: config.committer.clone(),
        };

        let receipt = self.repository.commit(&config.repository, request).await?;

        Ok(ScaleDown {
            receipt,
            previous_replicas: scaled.previous_replicas,
        })
    }

    async fn notify(&self, event: &AlertEvent, receipt: &CommitReceipt) -> NotificationStatus {
        if !self.notifier.has_channels() {
            return NotificationStatus::NotConfigured;
        }

        let results = self
            .notifier
            .notify_and_wait(NotifyEvent::ManifestCommitted {
                repository: self.config.repository.to_string(),
                path: self.config.path.clone(),
                branch: self.config.reference.clone(),
                commit_sha: receipt.commit_sha.clone(),
                rule: event.rule.clone(),
                namespace: event.subject.namespace.clone(),
                pod: event.subject.pod.clone(),
                timestamp: chrono::Utc::now(),
            })
            .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|(channel, result)| {
                result.err().map(|e| {
                    warn!(channel, error = %e, "Change notification failed");
                    format!("{channel}: {e}")
                })
            })
            .collect();

        if failures.is_empty() {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed(failures.join("; "))
        }
    }

    fn log_outcome(&self, outcome: &RemediationOutcome) {
        let config = &self.config;
        match outcome {
            RemediationOutcome::Skipped { reason } => {
                debug!(reason = %reason, "Remediation skipped");
            }
            RemediationOutcome::Committed {
                workload,
                rule,
                receipt,
                previous_replicas,
                notification,
            } => {
                info!(
                    outcome = outcome.label(),
                    workload = %workload,
                    rule = %rule,
                    repository = %config.repository,
                    path = %config.path,
                    status = receipt.status,
                    commit = %receipt.commit_sha,
                    version = %receipt.version,
                    previous_replicas = ?previous_replicas,
                    notification = ?notification,
                    "Scaled workload down to zero replicas"
                );
            }
            RemediationOutcome::Conflict {
                workload,
                rule,
                path,
            } => {
                warn!(
                    outcome = outcome.label(),
                    workload = %workload,
                    rule = %rule,
                    repository = %config.repository,
                    path = %path,
                    "Manifest changed concurrently, dropping remediation"
                );
            }
            RemediationOutcome::UpstreamError {
                workload,
                rule,
                error,
            } => {
                error!(
                    outcome = outcome.label(),
                    workload = %workload,
                    rule = %rule,
                    repository = %config.repository,
                    path = %config.path,
                    error = %error,
                    "Remediation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use crate::event::{FALCO_EVENT_TYPE, FALCO_SOURCE, TERMINAL_SHELL_RULE};
    use crate::repository::{
        Identity, ManifestSnapshot, MockManifestRepository, RepositoryRef, VersionToken,
    };
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(notify_url: Option<String>) -> Arc<RemediatorConfig> {
        Arc::new(RemediatorConfig {
            repository: RepositoryRef::new("acme", "deploy"),
            path: "apps/web.yaml".to_string(),
            reference: "main".to_string(),
            token: "t".to_string(),
            notify_url,
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            github_api_url: "http://127.0.0.1:1".to_string(),
            commit_message: "scaling down to zero replicas".to_string(),
            committer: Identity {
                name: "falco".to_string(),
                email: "falco@falco.com".to_string(),
            },
            http_timeout: None,
            log_format: LogFormat::Text,
        })
    }

    fn alert(rule: &str) -> AlertEvent {
        AlertEvent {
            id: "evt-1".to_string(),
            source: FALCO_SOURCE.to_string(),
            ty: FALCO_EVENT_TYPE.to_string(),
            rule: rule.to_string(),
            priority: "Notice".to_string(),
            time: None,
            output: "A shell was spawned in a container".to_string(),
            subject: Workload {
                namespace: Some("default".to_string()),
                pod: Some("web-0".to_string()),
                ..Workload::default()
            },
        }
    }

    fn snapshot(content: &str, sha: &str) -> ManifestSnapshot {
        ManifestSnapshot {
            content: content.to_string(),
            version: VersionToken::new(sha),
        }
    }

    fn receipt() -> CommitReceipt {
        CommitReceipt {
            version: VersionToken::new("sha-2"),
            commit_sha: "c0ffee".to_string(),
            html_url: None,
            status: 200,
        }
    }

    fn orchestrator(repo: MockManifestRepository, notify_url: Option<String>) -> Orchestrator {
        let notifier = Notifier::webhook(notify_url.clone(), reqwest::Client::new());
        Orchestrator::new(config(notify_url), Arc::new(repo), notifier)
    }

    #[tokio::test]
    async fn test_non_actionable_alert_makes_no_remote_calls() {
        // No expectations: any call on the mock panics
        let orchestrator = orchestrator(MockManifestRepository::new(), None);

        let outcome = orchestrator.handle(&alert("Write below etc")).await;
        assert!(matches!(outcome, RemediationOutcome::Skipped { .. }));

        let mut other_source = alert(TERMINAL_SHELL_RULE);
        other_source.source = "example.com".to_string();
        let outcome = orchestrator.handle(&other_source).await;
        assert_eq!(outcome.label(), "skipped");
    }

    #[tokio::test]
    async fn test_commits_scaled_manifest_with_fetched_sha() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .withf(|repository, path, revision| {
                repository.to_string() == "acme/deploy"
                    && path == "apps/web.yaml"
                    && revision == "main"
            })
            .times(1)
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 3\n  template: foo", "sha-1")));
        repo.expect_commit()
            .withf(|_, request| {
                request.content == "spec:\n  replicas: 0\n  template: foo"
                    && request.expected_version.as_str() == "sha-1"
                    && request.branch == "main"
                    && request.message == "scaling down to zero replicas"
                    && request.author.name == "falco"
            })
            .times(1)
            .returning(|_, _| Ok(receipt()));

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        match outcome {
            RemediationOutcome::Committed {
                workload,
                rule,
                receipt,
                previous_replicas,
                notification,
            } => {
                assert_eq!(workload.to_string(), "default/web-0");
                assert_eq!(rule, TERMINAL_SHELL_RULE);
                assert_eq!(receipt.commit_sha, "c0ffee");
                assert_eq!(previous_replicas, Some(3));
                assert_eq!(notification, NotificationStatus::NotConfigured);
            }
            other => panic!("expected committed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_schema_error_never_commits() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("kind: ConfigMap\ndata: {}\n", "sha-1")));
        repo.expect_commit().times(0);

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        assert!(matches!(
            outcome,
            RemediationOutcome::UpstreamError {
                error: RemediationError::Schema(ManifestError::MissingSpec),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fetch_failure_never_commits() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch().returning(|_, path, revision| {
            Err(RepositoryError::NotFound {
                path: path.to_string(),
                reference: revision.to_string(),
            })
        });
        repo.expect_commit().times(0);

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        assert_eq!(outcome.label(), "upstream-error");
    }

    #[tokio::test]
    async fn test_stale_version_is_conflict_without_retry() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .times(1)
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 2\n", "sha-1")));
        repo.expect_commit().times(1).returning(|_, request| {
            Err(RepositoryError::Conflict {
                path: request.path.clone(),
            })
        });

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        match outcome {
            RemediationOutcome::Conflict { path, .. } => assert_eq!(path, "apps/web.yaml"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_auth_failure_is_upstream_error() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 2\n", "sha-1")));
        repo.expect_commit().returning(|_, _| {
            Err(RepositoryError::Auth {
                status: 401,
                message: "Bad credentials".to_string(),
            })
        });

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        assert!(matches!(
            outcome,
            RemediationOutcome::UpstreamError {
                error: RemediationError::Repository(RepositoryError::Auth { .. }),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_committed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 2\n", "sha-1")));
        repo.expect_commit().returning(|_, _| Ok(receipt()));

        let outcome = orchestrator(repo, Some(server.uri()))
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        assert!(outcome.is_committed());
        match outcome {
            RemediationOutcome::Committed { notification, .. } => {
                assert!(matches!(notification, NotificationStatus::Failed(_)));
            }
            other => panic!("expected committed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_notifier_keeps_committed() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 2\n", "sha-1")));
        repo.expect_commit().returning(|_, _| Ok(receipt()));

        let outcome = orchestrator(repo, Some("http://127.0.0.1:1/hook".to_string()))
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        assert!(outcome.is_committed());
    }

    #[tokio::test]
    async fn test_notifier_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 2\n", "sha-1")));
        repo.expect_commit().returning(|_, _| Ok(receipt()));

        let outcome = orchestrator(repo, Some(server.uri()))
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        match outcome {
            RemediationOutcome::Committed { notification, .. } => {
                assert_eq!(notification, NotificationStatus::Sent);
            }
            other => panic!("expected committed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_replay_on_zero_replicas_still_commits() {
        let mut repo = MockManifestRepository::new();
        repo.expect_fetch()
            .returning(|_, _, _| Ok(snapshot("spec:\n  replicas: 0\n", "sha-2")));
        repo.expect_commit()
            .withf(|_, request| {
                request.content == "spec:\n  replicas: 0\n"
                    && request.expected_version.as_str() == "sha-2"
            })
            .times(1)
            .returning(|_, _| Ok(receipt()));

        let outcome = orchestrator(repo, None)
            .handle(&alert(TERMINAL_SHELL_RULE))
            .await;

        match outcome {
            RemediationOutcome::Committed {
                previous_replicas, ..
            } => assert_eq!(previous_replicas, Some(0)),
            other => panic!("expected committed, got {other:?}"),
        }
    }
}

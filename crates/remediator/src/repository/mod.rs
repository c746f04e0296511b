//! # Manifest Repository Client
//!
//! Reads a manifest from a source-controlled store together with a version
//! token, and writes it back only if the version is still current.
//!
//! The conditional write is the only thing keeping two concurrent
//! remediations of the same manifest from overwriting each other: both may
//! read the same version, but the host accepts at most one write against it
//! and answers the other with [`RepositoryError::Conflict`]. The client never
//! retries; what to do with a conflict is the caller's decision.

pub mod github;

pub use github::GitHubContents;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    #[must_use]
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Opaque identifier of the exact revision that was read.
///
/// Deliberately neither `Clone` nor `Copy`: a token is moved into the one
/// commit it guards and cannot be used again.
#[derive(Debug, PartialEq, Eq)]
pub struct VersionToken(String);

impl VersionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The manifest as read from the repository.
#[derive(Debug)]
pub struct ManifestSnapshot {
    pub content: String,
    pub version: VersionToken,
}

/// Commit author/committer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// A write conditioned on `expected_version`.
#[derive(Debug)]
pub struct CommitRequest {
    pub path: String,
    pub branch: String,
    pub content: String,
    pub expected_version: VersionToken,
    pub message: String,
    pub author: Identity,
}

/// Result of a successful commit.
#[derive(Debug)]
pub struct CommitReceipt {
    /// Version token of the file as written
    pub version: VersionToken,
    /// Identifier of the created commit
    pub commit_sha: String,
    pub html_url: Option<String>,
    /// HTTP status the host answered with
    pub status: u16,
}

/// Remote-call failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{path} not found at {reference}")]
    NotFound { path: String, reference: String },

    #[error("credential rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("{path} changed since it was read")]
    Conflict { path: String },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("repository API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Whether the write lost an optimistic-concurrency race.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Versioned read and conditional write of a single file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManifestRepository: Send + Sync {
    /// Read `path` at `revision`.
    async fn fetch(
        &self,
        repository: &RepositoryRef,
        path: &str,
        revision: &str,
    ) -> Result<ManifestSnapshot, RepositoryError>;

    /// Write new content, failing with [`RepositoryError::Conflict`] if the
    /// file no longer matches `request.expected_version`.
    async fn commit(
        &self,
        repository: &RepositoryRef,
        request: CommitRequest,
    ) -> Result<CommitReceipt, RepositoryError>;
}

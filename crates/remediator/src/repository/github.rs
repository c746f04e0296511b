//! GitHub contents API client.
//!
//! The blob SHA returned by `GET /repos/{owner}/{repo}/contents/{path}` is the
//! version token; `PUT` on the same path requires it and answers `409` when the
//! file has moved on.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    CommitReceipt, CommitRequest, Identity, ManifestRepository, ManifestSnapshot, RepositoryError,
    RepositoryRef, VersionToken,
};

/// Public GitHub API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// Manifest repository backed by the GitHub contents API.
#[derive(Debug, Clone)]
pub struct GitHubContents {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct GitHubError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct FileContents {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Serialize)]
struct UpdateFileRequest<'a> {
    message: &'a str,
    content: String,
    sha: &'a str,
    branch: &'a str,
    committer: &'a Identity,
    author: &'a Identity,
}

#[derive(Debug, Deserialize)]
struct UpdateFileResponse {
    content: Option<ContentRef>,
    commit: CommitRef,
}

#[derive(Debug, Deserialize)]
struct ContentRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

impl GitHubContents {
    /// Create a client for `base_url` (e.g. [`GITHUB_API_URL`] or a GitHub
    /// Enterprise `/api/v3` root).
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn contents_url(&self, repository: &RepositoryRef, path: &str) -> String {
        let path = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");

        format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url,
            urlencoding::encode(&repository.owner),
            urlencoding::encode(&repository.name),
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(USER_AGENT, concat!("falco-remediator/", env!("CARGO_PKG_VERSION")))
    }
}

fn transport_error(err: &reqwest::Error) -> RepositoryError {
    RepositoryError::Transient(err.to_string())
}

/// Map a non-success status to the error taxonomy.
fn classify_status(
    status: StatusCode,
    rate_limited: bool,
    path: &str,
    reference: &str,
    message: String,
) -> RepositoryError {
    match status.as_u16() {
        404 => RepositoryError::NotFound {
            path: path.to_string(),
            reference: reference.to_string(),
        },
        403 if rate_limited => RepositoryError::Transient(format!("rate limited: {message}")),
        code @ (401 | 403) => RepositoryError::Auth {
            status: code,
            message,
        },
        409 | 412 => RepositoryError::Conflict {
            path: path.to_string(),
        },
        429 => RepositoryError::Transient(format!("rate limited: {message}")),
        _ if status.is_server_error() => {
            RepositoryError::Transient(format!("{status}: {message}"))
        }
        code => RepositoryError::Api {
            status: code,
            message,
        },
    }
}

async fn error_from_response(response: Response, path: &str, reference: &str) -> RepositoryError {
    let status = response.status();
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|remaining| remaining.trim() == "0");

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<GitHubError>(&body)
        .map(|e| e.message)
        .unwrap_or(body);

    classify_status(status, rate_limited, path, reference, message)
}

fn decode_content(file: &FileContents) -> Result<String, RepositoryError> {
    if file.encoding != "base64" {
        return Err(RepositoryError::Decode(format!(
            "unsupported content encoding `{}`",
            file.encoding
        )));
    }

    let cleaned: String = file
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(cleaned)
        .map_err(|e| RepositoryError::Decode(format!("invalid base64 content: {e}")))?;

    String::from_utf8(bytes)
        .map_err(|e| RepositoryError::Decode(format!("content is not UTF-8: {e}")))
}

#[async_trait]
impl ManifestRepository for GitHubContents {
    #[instrument(skip(self), fields(repository = %repository))]
    async fn fetch(
        &self,
        repository: &RepositoryRef,
        path: &str,
        revision: &str,
    ) -> Result<ManifestSnapshot, RepositoryError> {
        let url = self.contents_url(repository, path);

        let response = self
            .request(Method::GET, &url)
            .query(&[("ref", revision)])
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, path, revision).await);
        }

        let file: FileContents = response.json().await.map_err(|e| {
            RepositoryError::Decode(format!("{path} is not a single file: {e}"))
        })?;
        let content = decode_content(&file)?;

        debug!(sha = %file.sha, bytes = content.len(), "Fetched manifest");

        Ok(ManifestSnapshot {
            content,
            version: VersionToken::new(file.sha),
        })
    }

    #[instrument(
        skip(self, request),
        fields(repository = %repository, path = %request.path, branch = %request.branch)
    )]
    async fn commit(
        &self,
        repository: &RepositoryRef,
        request: CommitRequest,
    ) -> Result<CommitReceipt, RepositoryError> {
        let url = self.contents_url(repository, &request.path);

        let body = UpdateFileRequest {
            message: &request.message,
            content: STANDARD.encode(request.content.as_bytes()),
            sha: request.expected_version.as_str(),
            branch: &request.branch,
            committer: &request.author,
            author: &request.author,
        };

        let response = self
            .request(Method::PUT, &url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response, &request.path, &request.branch).await);
        }

        let updated: UpdateFileResponse = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(format!("commit response: {e}")))?;

        let version = updated
            .content
            .map(|c| c.sha)
            .ok_or_else(|| RepositoryError::Decode("commit response has no content".to_string()))?;

        Ok(CommitReceipt {
            version: VersionToken::new(version),
            commit_sha: updated.commit.sha,
            html_url: updated.commit.html_url,
            status: status.as_u16(),
        })
    }
}

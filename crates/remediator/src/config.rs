//! Startup configuration.
//!
//! Flags (with environment fallbacks) are parsed once into [`Cli`] and
//! validated into a [`RemediatorConfig`] before the listener binds. The
//! config is then shared read-only with every request.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::repository::github::GITHUB_API_URL;
use crate::repository::{Identity, RepositoryRef};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Scale workloads to zero when Falco reports a terminal shell in a container
#[derive(Debug, Parser)]
#[command(name = "falco-remediator")]
#[command(version)]
pub struct Cli {
    /// Manifest path inside the repository
    #[arg(long, env = "REMEDIATOR_FILE", default_value = "")]
    pub file: String,

    /// Branch (or other reference) to read from and commit to
    #[arg(long = "ref", env = "REMEDIATOR_REF", default_value = "master")]
    pub reference: String,

    /// GitHub token used as bearer credential
    #[arg(long, env = "REMEDIATOR_GITHUB_TOKEN", default_value = "", hide_env_values = true)]
    pub github_token: String,

    /// Owner of the repository
    #[arg(long, env = "REMEDIATOR_OWNER", default_value = "")]
    pub owner: String,

    /// Name of the repository holding the manifest
    #[arg(long, env = "REMEDIATOR_REPOSITORY", default_value = "")]
    pub repository: String,

    /// URL to notify (e.g. a Flux v2 webhook receiver) after a commit
    #[arg(long, env = "REMEDIATOR_NOTIFY_URL")]
    pub notify_url: Option<String>,

    /// Turn notifications off even when a URL is configured
    /// (accepts `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`)
    #[arg(
        long,
        env = "NOTIFY_DISABLED",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        require_equals = true,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub notify_disabled: bool,

    /// Address to receive CloudEvents on
    #[arg(long, env = "REMEDIATOR_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// GitHub API root (GitHub Enterprise: https://host/api/v3)
    #[arg(long, env = "REMEDIATOR_GITHUB_API_URL", default_value = GITHUB_API_URL)]
    pub github_api_url: String,

    /// Commit message for the scale-down commit
    #[arg(long, default_value = "scaling down to zero replicas")]
    pub commit_message: String,

    /// Commit author and committer name
    #[arg(long, default_value = "falco")]
    pub committer_name: String,

    /// Commit author and committer email
    #[arg(long, default_value = "falco@falco.com")]
    pub committer_email: String,

    /// Timeout for each outbound HTTP call in seconds (0 disables it)
    #[arg(long, default_value = "30")]
    pub http_timeout_secs: u64,

    /// Log output format
    #[arg(long, env = "REMEDIATOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Configuration problems detected at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid URL for {flag}: {reason}")]
    InvalidUrl { flag: &'static str, reason: String },
}

/// Validated service configuration.
#[derive(Clone)]
pub struct RemediatorConfig {
    pub repository: RepositoryRef,
    pub path: String,
    pub reference: String,
    pub token: String,
    pub notify_url: Option<String>,
    pub listen_addr: SocketAddr,
    pub github_api_url: String,
    pub commit_message: String,
    pub committer: Identity,
    pub http_timeout: Option<Duration>,
    pub log_format: LogFormat,
}

impl fmt::Debug for RemediatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemediatorConfig")
            .field("repository", &self.repository)
            .field("path", &self.path)
            .field("reference", &self.reference)
            .field("token", &"<redacted>")
            .field("notify_url", &self.notify_url)
            .field("listen_addr", &self.listen_addr)
            .field("github_api_url", &self.github_api_url)
            .field("commit_message", &self.commit_message)
            .field("committer", &self.committer)
            .field("http_timeout", &self.http_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn check_url(flag: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        flag,
        reason: e.to_string(),
    })?;

    if matches!(url.scheme(), "http" | "https") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            flag,
            reason: format!("unsupported scheme `{}`", url.scheme()),
        })
    }
}

impl TryFrom<Cli> for RemediatorConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let required = [
            ("--github-token", &cli.github_token),
            ("--file", &cli.file),
            ("--owner", &cli.owner),
            ("--repository", &cli.repository),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(flag, _)| *flag)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let notify_url = cli
            .notify_url
            .filter(|u| !cli.notify_disabled && !u.trim().is_empty());
        if let Some(url) = &notify_url {
            check_url("--notify-url", url)?;
        }
        check_url("--github-api-url", &cli.github_api_url)?;

        Ok(Self {
            repository: RepositoryRef::new(cli.owner.trim(), cli.repository.trim()),
            path: cli.file.trim().trim_start_matches('/').to_string(),
            reference: cli.reference,
            token: cli.github_token.trim().to_string(),
            notify_url,
            listen_addr: cli.listen_addr,
            github_api_url: cli.github_api_url,
            commit_message: cli.commit_message,
            committer: Identity {
                name: cli.committer_name,
                email: cli.committer_email,
            },
            http_timeout: (cli.http_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.http_timeout_secs)),
            log_format: cli.log_format,
        })
    }
}

//! falco-remediator binary.

use anyhow::{Context, Result};
use clap::Parser;
use notify::Notifier;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use remediator::repository::GitHubContents;
use remediator::{
    run_server, shutdown_signal, AppState, Cli, LogFormat, Orchestrator, RemediatorConfig,
};

const DEFAULT_LOG_FILTER: &str =
    "falco_remediator=info,remediator=info,notify=info,tower_http=info";

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RemediatorConfig::try_from(cli).context("invalid configuration")?;

    init_tracing(config.log_format);

    info!(
        repository = %config.repository,
        path = %config.path,
        reference = %config.reference,
        "Starting falco-remediator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("falco-remediator/", env!("CARGO_PKG_VERSION")));
    if let Some(timeout) = config.http_timeout {
        builder = builder.timeout(timeout);
    }
    let client = builder.build().context("failed to build HTTP client")?;

    let repository = GitHubContents::new(client.clone(), &config.github_api_url, &config.token);
    let notifier = Notifier::webhook(config.notify_url.clone(), client);
    info!(channels = notifier.channel_count(), "Change notifications configured");

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let orchestrator = Orchestrator::new(Arc::new(config), Arc::new(repository), notifier);

    run_server(listener, Arc::new(AppState::new(orchestrator)), shutdown_signal()).await
}

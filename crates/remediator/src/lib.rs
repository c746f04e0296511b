//! Falco remediator.
//!
//! Receives Falco alerts as CloudEvents and, for the terminal-shell rule,
//! commits a `replicas: 0` change to the workload manifest in a GitOps
//! repository. The commit is conditioned on the version that was read, so
//! concurrent alerts for the same manifest produce at most one write.
//!
//! # Modules
//!
//! - [`event`]: CloudEvent decoding and alert validation
//! - [`repository`]: versioned manifest reads and conditional commits
//! - [`manifest`]: the `spec.replicas` mutation
//! - [`orchestrator`]: the per-alert pipeline
//! - [`server`]: HTTP ingress
//! - [`config`]: startup flags

pub mod config;
pub mod event;
pub mod manifest;
pub mod orchestrator;
pub mod repository;
pub mod server;

pub use config::{Cli, LogFormat, RemediatorConfig};
pub use orchestrator::{NotificationStatus, Orchestrator, RemediationOutcome};
pub use server::{build_router, run_server, shutdown_signal, AppState};

//! Typed error taxonomy, one leaf enum per subsystem (§7).
//!
//! Each loop matches on its own concrete error type rather than downcasting
//! a shared catch-all; `anyhow` is reserved for the startup path in
//! `daemon::bootstrap`, where a handful of genuinely-fatal, non-recoverable
//! conditions are collected and reported once before the process exits.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("service name already exists: {0}")]
    AlreadyExists(String),
    #[error("service version conflict (stale optimistic-concurrency guard)")]
    VersionMismatch,
    #[error("service version index {0} exceeds i32::MAX; cannot update via bollard")]
    InvalidVersion(i64),
    #[error("this node is not part of a swarm cluster")]
    NotInCluster,
    #[error("this node is not a swarm manager")]
    NotSwarmManager,
    #[error("docker engine error: {0}")]
    Bollard(#[from] bollard::errors::Error),
}

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("control-plane transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("control-plane response was not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("control-plane returned a logical error: {0}")]
    LogicalError(String),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("service {0} has no version metadata; skipping this cycle")]
    MissingVersion(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{field} must be greater than zero, got {value}")]
    NotPositive { field: &'static str, value: i64 },
    #[error("{field} is required when AUTOSWARM_DOKPLOY_API_KEY is set")]
    MissingWhenEnabled { field: &'static str },
}

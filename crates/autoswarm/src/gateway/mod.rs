//! Orchestrator Gateway (§4.1) — the narrow, object-safe contract the rest
//! of the daemon uses to talk to the container engine.
//!
//! Object-safe async trait: every method returns a boxed, pinned future
//! rather than using `async fn` directly, so `dyn OrchestratorGateway` can be
//! stored behind a single trait object and swapped between the live
//! `bollard`-backed implementation and the in-memory fake used in tests.

pub mod fake;
pub mod live;

use std::future::Future;
use std::pin::Pin;

use crate::error::GatewayError;
use crate::model::{ContainerAttributes, ServiceSpec};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A network as reported by the engine.
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub driver: String,
}

/// A container handle as returned by a container listing.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub labels: std::collections::HashMap<String, String>,
}

/// One event from the engine's event stream, filtered to the fields the
/// supervisor actually inspects (§4.5).
#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub event_type: String,
    pub action: String,
    pub id: Option<String>,
}

pub trait OrchestratorGateway: Send + Sync {
    /// The id of the swarm node this gateway is connected to. Called once at
    /// startup; `Err(GatewayError::NotInCluster)` aborts the process.
    fn local_node_id(&self) -> BoxFuture<'_, Result<String, GatewayError>>;

    /// Resolve an overlay network by name. `Ok(None)` when not found — this
    /// is a non-fatal, logged condition, not an error.
    fn resolve_network<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<NetworkInfo>, GatewayError>>;

    fn list_networks(&self) -> BoxFuture<'_, Result<Vec<NetworkInfo>, GatewayError>>;

    /// All containers, including stopped ones, for the initial sweep (§4.5).
    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerHandle>, GatewayError>>;

    fn get_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerAttributes, GatewayError>>;

    fn list_services(&self) -> BoxFuture<'_, Result<Vec<crate::model::LiveService>, GatewayError>>;

    fn get_service<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<crate::model::LiveService>, GatewayError>>;

    /// Fails with `GatewayError::AlreadyExists` on a name collision; the
    /// reconciler treats that as non-retryable (§7).
    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, Result<String, GatewayError>>;

    /// Version-guarded update. Fails with `GatewayError::VersionMismatch` if
    /// `version` no longer matches the service's current version.
    fn update_service<'a>(
        &'a self,
        service_id: &'a str,
        version: i64,
        labels: &'a std::collections::HashMap<String, String>,
        task_template: &'a crate::model::TaskTemplateSpec,
        networks: Option<&'a [crate::model::NetworkAttachment]>,
    ) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn stop_container<'a>(&'a self, id: &'a str, timeout_secs: u32) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    /// A hot stream of engine events, already filtered server-side to
    /// `type == "container"` where the underlying transport supports it.
    fn event_stream(&self) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EngineEvent, GatewayError>> + Send + '_>>;
}

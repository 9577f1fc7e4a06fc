//! Daemon bootstrap — resolves the gateway, control-plane client, local node
//! id, and ingress network id once at startup and hands them to the
//! supervisor, replacing the original's module-level globals with an
//! explicit aggregate the way the teacher's `AgentState`/`SharedState` does.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::AutoswarmConfig;
use crate::control_plane::ControlPlaneClient;
use crate::gateway::live::LiveGateway;
use crate::gateway::OrchestratorGateway;
use crate::supervisor::Supervisor;

/// Resolve everything the supervisor needs and build it. Returns an error
/// (fatal, process-ending) if this node isn't part of a swarm cluster.
pub async fn bootstrap(config: &AutoswarmConfig) -> Result<Arc<Supervisor>> {
    let gateway: Arc<dyn OrchestratorGateway> = Arc::new(
        LiveGateway::connect(&config.docker_host).context("failed to connect to the Docker engine")?,
    );

    let local_node_id = gateway
        .local_node_id()
        .await
        .context("this node is not part of a Swarm cluster")?;
    tracing::info!(node_id = %local_node_id, "resolved local swarm node id");

    let ingress_network_id = match gateway.resolve_network(&config.traefik_network).await {
        Ok(Some(network)) => network.id,
        Ok(None) => {
            tracing::warn!(network = %config.traefik_network, "ingress network not found; proceeding without it");
            String::new()
        }
        Err(err) => {
            tracing::warn!(network = %config.traefik_network, error = %err, "failed to resolve ingress network");
            String::new()
        }
    };

    let control_plane = Arc::new(ControlPlaneClient::new(
        config.dokploy_url.clone(),
        config.dokploy_api_key.clone(),
        Duration::from_secs(config.dokploy_cache_ttl_secs),
    ));

    Ok(Arc::new(Supervisor {
        gateway,
        control_plane,
        local_node_id,
        ingress_network_name: config.traefik_network.clone(),
        ingress_network_id,
        reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
    }))
}

//! Event-driven and periodic reconciliation loops (§3, §4.5).
//!
//! Three workers share one `CancellationToken`: the initial sweep (runs
//! once before either loop starts), the event loop (reacts to container
//! create/start events with a per-id de-dup set), and the periodic loop
//! (tick-based full reconciliation). The event loop fans conversions out
//! onto spawned tasks so a slow `create_service` call on one container
//! never delays the next event's dispatch, mirroring the background
//! inventory-sync task's "never block the loop on one slow call" shape.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control_plane::ControlPlaneClient;
use crate::gateway::OrchestratorGateway;
use crate::reconciler;
use crate::translator;

const CONVERT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Supervisor {
    pub gateway: Arc<dyn OrchestratorGateway>,
    pub control_plane: Arc<ControlPlaneClient>,
    pub local_node_id: String,
    pub ingress_network_name: String,
    pub ingress_network_id: String,
    pub reconcile_interval: Duration,
}

impl Supervisor {
    /// Walk every existing container once at startup and convert anything
    /// unmanaged, so containers that predate this process don't wait for
    /// their next create/start event to be picked up.
    pub async fn initial_sweep(&self) {
        info!("performing initial sweep of standalone containers");
        let handles = match self.gateway.list_containers().await {
            Ok(handles) => handles,
            Err(err) => {
                error!(error = %err, "initial sweep failed to list containers");
                return;
            }
        };
        for handle in handles {
            if translator::is_swarm_container(&handle.labels) || translator::should_ignore(&handle.labels) {
                continue;
            }
            self.convert_container(&handle.id).await;
        }
    }

    /// Inspect, translate, and create a swarm service for one container id.
    /// Stops and removes the source container on success, then immediately
    /// reconciles the newly created service against control-plane metadata
    /// (restored from the pre-modularization behavior — see DESIGN.md).
    pub async fn convert_container(&self, container_id: &str) {
        let container = match self.gateway.get_container(container_id).await {
            Ok(container) => container,
            Err(err) => {
                debug!(container_id, error = %err, "could not inspect container for conversion");
                return;
            }
        };

        if translator::should_ignore(&container.labels) {
            info!(container = %container.name, "ignoring container due to autoswarm.ignore=true");
            return;
        }
        if translator::is_swarm_container(&container.labels) {
            return;
        }

        let networks = match self.gateway.list_networks().await {
            Ok(networks) => networks,
            Err(err) => {
                error!(error = %err, "failed to list networks during conversion");
                return;
            }
        };

        let spec = translator::translate(&container, &self.local_node_id, &networks, &self.ingress_network_name);
        let service_name = spec.name.clone();
        info!(
            service = %service_name,
            container = %container.name,
            image = %container.image,
            "creating swarm service from container"
        );

        match self.gateway.create_service(&spec).await {
            Ok(_) => {}
            Err(err) => {
                error!(service = %service_name, error = %err, "failed to create service");
                return;
            }
        }

        if let Err(err) = self.gateway.stop_container(container_id, 5).await {
            warn!(container = %container.name, error = %err, "failed to stop source container");
        }
        if let Err(err) = self.gateway.remove_container(container_id).await {
            warn!(container = %container.name, error = %err, "failed to remove source container");
        }

        if let Err(err) = reconciler::reconcile_service_by_name(
            self.gateway.as_ref(),
            &self.control_plane,
            &service_name,
            &self.ingress_network_id,
        )
        .await
        {
            error!(service = %service_name, error = %err, "post-conversion reconciliation failed");
        }
    }

    /// React to container create/start events as they arrive. Each
    /// container id is converted at most once per process lifetime via the
    /// `handled` de-dup set, matching the original event monitor's
    /// unbounded-but-acceptable dedup (see DESIGN.md Open Question (c)).
    pub async fn run_event_loop(self: Arc<Self>, cancellation: CancellationToken) {
        let handled: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let mut stream = self.gateway.event_stream();

        loop {
            let event = tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("event loop received shutdown signal");
                    break;
                }
                event = stream.next() => event,
            };

            let Some(event) = event else {
                info!("event stream closed; retrying in 3s");
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(3)) => {}
                }
                stream = self.gateway.event_stream();
                continue;
            };

            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    error!(error = %err, "event stream error; retrying in 3s");
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(3)) => {}
                    }
                    stream = self.gateway.event_stream();
                    continue;
                }
            };

            if event.event_type != "container" || !matches!(event.action.as_str(), "create" | "start") {
                continue;
            }
            let Some(id) = event.id else { continue };

            {
                let mut handled_guard = handled.lock().await;
                if !handled_guard.insert(id.clone()) {
                    continue;
                }
            }

            let supervisor = Arc::clone(&self);
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancellation.cancelled() => {}
                    result = tokio::time::timeout(CONVERT_TIMEOUT, supervisor.convert_container(&id)) => {
                        if result.is_err() {
                            warn!(container_id = %id, "container conversion timed out");
                        }
                    }
                }
            });
        }
    }

    /// Tick-based full reconciliation between control-plane applications and
    /// their matching swarm services.
    pub async fn run_periodic_loop(self: Arc<Self>, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.reconcile_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("periodic reconciliation loop received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    reconciler::reconcile_all(self.gateway.as_ref(), &self.control_plane, &self.ingress_network_id).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fake::FakeGateway;
    use crate::gateway::EngineEvent;
    use crate::model::ContainerAttributes;
    use std::collections::HashMap;

    fn supervisor_with_fake(gateway: Arc<FakeGateway>) -> Arc<Supervisor> {
        Arc::new(Supervisor {
            gateway,
            control_plane: Arc::new(ControlPlaneClient::new(String::new(), None, Duration::from_secs(30))),
            local_node_id: "node-1".to_string(),
            ingress_network_name: "traefik-public".to_string(),
            ingress_network_id: String::new(),
            reconcile_interval: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn convert_container_creates_service_and_removes_source() {
        let gateway = Arc::new(FakeGateway::new());
        gateway
            .add_container(ContainerAttributes {
                id: "c1".to_string(),
                name: "/standalone".to_string(),
                image: "nginx:latest".to_string(),
                ..Default::default()
            })
            .await;
        let supervisor = supervisor_with_fake(gateway.clone());

        supervisor.convert_container("c1").await;

        let service = gateway.get_service_by_name("standalone").await;
        assert!(service.is_some());
        assert_eq!(gateway.stopped_containers().await, vec!["c1".to_string()]);
        assert_eq!(gateway.removed_containers().await, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn convert_container_skips_ignored_labels() {
        let gateway = Arc::new(FakeGateway::new());
        let mut labels = HashMap::new();
        labels.insert("autoswarm.ignore".to_string(), "true".to_string());
        gateway
            .add_container(ContainerAttributes { id: "c1".to_string(), name: "/skip-me".to_string(), labels, ..Default::default() })
            .await;
        let supervisor = supervisor_with_fake(gateway.clone());

        supervisor.convert_container("c1").await;

        assert!(gateway.get_service_by_name("skip-me").await.is_none());
        assert!(gateway.stopped_containers().await.is_empty());
    }

    #[tokio::test]
    async fn convert_container_skips_already_swarm_managed() {
        let gateway = Arc::new(FakeGateway::new());
        let mut labels = HashMap::new();
        labels.insert("com.docker.swarm.service.name".to_string(), "already-managed".to_string());
        gateway
            .add_container(ContainerAttributes { id: "c1".to_string(), name: "/managed".to_string(), labels, ..Default::default() })
            .await;
        let supervisor = supervisor_with_fake(gateway.clone());

        supervisor.convert_container("c1").await;

        assert!(gateway.stopped_containers().await.is_empty());
    }

    #[tokio::test]
    async fn initial_sweep_converts_only_unmanaged_containers() {
        let gateway = Arc::new(FakeGateway::new());
        gateway
            .add_container(ContainerAttributes { id: "c1".to_string(), name: "/plain".to_string(), ..Default::default() })
            .await;
        let mut managed_labels = HashMap::new();
        managed_labels.insert("autoswarm.managed".to_string(), "true".to_string());
        gateway
            .add_container(ContainerAttributes {
                id: "c2".to_string(),
                name: "/already-a-service".to_string(),
                labels: managed_labels,
                ..Default::default()
            })
            .await;
        let supervisor = supervisor_with_fake(gateway.clone());

        supervisor.initial_sweep().await;

        assert!(gateway.get_service_by_name("plain").await.is_some());
        assert_eq!(gateway.stopped_containers().await, vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn event_loop_dedups_repeated_events_for_same_id() {
        let gateway = Arc::new(FakeGateway::new());
        gateway
            .add_container(ContainerAttributes { id: "c1".to_string(), name: "/dup".to_string(), ..Default::default() })
            .await;
        gateway.push_event(EngineEvent { event_type: "container".to_string(), action: "create".to_string(), id: Some("c1".to_string()) }).await;
        gateway.push_event(EngineEvent { event_type: "container".to_string(), action: "start".to_string(), id: Some("c1".to_string()) }).await;
        let supervisor = supervisor_with_fake(gateway.clone());

        let cancellation = CancellationToken::new();
        let loop_cancellation = cancellation.clone();
        let supervisor_clone = supervisor.clone();
        let handle = tokio::spawn(async move { supervisor_clone.run_event_loop(loop_cancellation).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancellation.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert_eq!(gateway.removed_containers().await.len(), 1);
    }
}

//! In-memory test double for `OrchestratorGateway`.
//!
//! All methods operate on in-memory state behind a single mutex. The seed
//! methods let a test pre-populate containers/services before running
//! supervisor or reconciler logic against the fake.

use std::collections::HashMap;
use std::pin::Pin;

use tokio::sync::Mutex;

use super::{BoxFuture, ContainerHandle, EngineEvent, NetworkInfo, OrchestratorGateway};
use crate::error::GatewayError;
use crate::model::{ContainerAttributes, LiveService, ServiceSpec};

#[derive(Default)]
struct Inner {
    local_node_id: Option<String>,
    networks: Vec<NetworkInfo>,
    containers: HashMap<String, ContainerAttributes>,
    services: HashMap<String, LiveService>,
    next_service_id: u64,
    next_version: i64,
    events: Vec<EngineEvent>,
    stopped: Vec<String>,
    removed: Vec<String>,
}

/// A deterministic in-memory gateway for unit and supervisor tests.
pub struct FakeGateway {
    inner: Mutex<Inner>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner { next_version: 1, ..Inner::default() }),
        }
    }

    pub async fn set_local_node_id(&self, id: impl Into<String>) {
        self.inner.lock().await.local_node_id = Some(id.into());
    }

    pub async fn add_network(&self, network: NetworkInfo) {
        self.inner.lock().await.networks.push(network);
    }

    pub async fn add_container(&self, container: ContainerAttributes) {
        self.inner.lock().await.containers.insert(container.id.clone(), container);
    }

    pub async fn add_service(&self, service: LiveService) {
        self.inner.lock().await.services.insert(service.name.clone(), service);
    }

    pub async fn push_event(&self, event: EngineEvent) {
        self.inner.lock().await.events.push(event);
    }

    pub async fn stopped_containers(&self) -> Vec<String> {
        self.inner.lock().await.stopped.clone()
    }

    pub async fn removed_containers(&self) -> Vec<String> {
        self.inner.lock().await.removed.clone()
    }

    pub async fn get_service_by_name(&self, name: &str) -> Option<LiveService> {
        self.inner.lock().await.services.get(name).cloned()
    }
}

impl OrchestratorGateway for FakeGateway {
    fn local_node_id(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .local_node_id
                .clone()
                .ok_or(GatewayError::NotInCluster)
        })
    }

    fn resolve_network<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<NetworkInfo>, GatewayError>> {
        Box::pin(async move {
            Ok(self.inner.lock().await.networks.iter().find(|n| n.name == name).cloned())
        })
    }

    fn list_networks(&self) -> BoxFuture<'_, Result<Vec<NetworkInfo>, GatewayError>> {
        Box::pin(async move { Ok(self.inner.lock().await.networks.clone()) })
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerHandle>, GatewayError>> {
        Box::pin(async move {
            Ok(self
                .inner
                .lock()
                .await
                .containers
                .values()
                .map(|c| ContainerHandle { id: c.id.clone(), labels: c.labels.clone() })
                .collect())
        })
    }

    fn get_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerAttributes, GatewayError>> {
        Box::pin(async move {
            self.inner
                .lock()
                .await
                .containers
                .get(id)
                .cloned()
                .ok_or_else(|| GatewayError::ContainerNotFound(id.to_string()))
        })
    }

    fn list_services(&self) -> BoxFuture<'_, Result<Vec<LiveService>, GatewayError>> {
        Box::pin(async move { Ok(self.inner.lock().await.services.values().cloned().collect()) })
    }

    fn get_service<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<LiveService>, GatewayError>> {
        Box::pin(async move { Ok(self.inner.lock().await.services.get(name).cloned()) })
    }

    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.services.contains_key(&spec.name) {
                return Err(GatewayError::AlreadyExists(spec.name.clone()));
            }
            state.next_service_id += 1;
            let id = format!("fake-service-{}", state.next_service_id);
            let version = state.next_version;
            let service = LiveService {
                id: id.clone(),
                name: spec.name.clone(),
                version_index: Some(version),
                labels: spec.labels.clone(),
                networks: spec.networks.clone(),
                container_labels: spec.task_template.container_spec.labels.clone(),
            };
            state.services.insert(spec.name.clone(), service);
            Ok(id)
        })
    }

    fn update_service<'a>(
        &'a self,
        service_id: &'a str,
        version: i64,
        labels: &'a HashMap<String, String>,
        task_template: &'a crate::model::TaskTemplateSpec,
        networks: Option<&'a [crate::model::NetworkAttachment]>,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let service = state
                .services
                .values_mut()
                .find(|s| s.id == service_id)
                .ok_or_else(|| GatewayError::ServiceNotFound(service_id.to_string()))?;
            if service.version_index != Some(version) {
                return Err(GatewayError::VersionMismatch);
            }
            service.labels = labels.clone();
            service.container_labels = task_template.container_spec.labels.clone();
            if let Some(nets) = networks {
                service.networks = nets.to_vec();
            }
            service.version_index = Some(version + 1);
            Ok(())
        })
    }

    fn stop_container<'a>(&'a self, id: &'a str, _timeout_secs: u32) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if !state.containers.contains_key(id) {
                return Err(GatewayError::ContainerNotFound(id.to_string()));
            }
            state.stopped.push(id.to_string());
            Ok(())
        })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.containers.remove(id).ok_or_else(|| GatewayError::ContainerNotFound(id.to_string()))?;
            state.removed.push(id.to_string());
            Ok(())
        })
    }

    fn event_stream(&self) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EngineEvent, GatewayError>> + Send + '_>> {
        Box::pin(async_stream::stream! {
            let events = self.inner.lock().await.events.clone();
            for event in events {
                yield Ok(event);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkAttachment, TaskTemplateSpec};

    fn sample_spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            labels: HashMap::new(),
            task_template: TaskTemplateSpec {
                container_spec: crate::model::ContainerSpecAttrs::default(),
                restart_policy: crate::model::RestartPolicySpec { condition: "any".to_string(), max_attempts: None },
                placement: crate::model::PlacementSpec::default(),
            },
            networks: vec![NetworkAttachment { target: "net1".to_string(), aliases: vec![] }],
            ports: vec![],
        }
    }

    #[tokio::test]
    async fn create_service_then_get_round_trips() {
        let gateway = FakeGateway::new();
        let spec = sample_spec("web");
        let id = gateway.create_service(&spec).await.unwrap();
        let found = gateway.get_service("web").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.version_index, Some(1));
    }

    #[tokio::test]
    async fn create_service_twice_fails_with_already_exists() {
        let gateway = FakeGateway::new();
        let spec = sample_spec("web");
        gateway.create_service(&spec).await.unwrap();
        let err = gateway.create_service(&spec).await.unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn update_service_with_stale_version_fails() {
        let gateway = FakeGateway::new();
        let spec = sample_spec("web");
        let id = gateway.create_service(&spec).await.unwrap();
        let labels = HashMap::new();
        let result = gateway
            .update_service(&id, 99, &labels, &spec.task_template, None)
            .await;
        assert!(matches!(result, Err(GatewayError::VersionMismatch)));
    }

    #[tokio::test]
    async fn update_service_with_current_version_succeeds_and_bumps_version() {
        let gateway = FakeGateway::new();
        let spec = sample_spec("web");
        let id = gateway.create_service(&spec).await.unwrap();
        let labels = HashMap::new();
        gateway.update_service(&id, 1, &labels, &spec.task_template, None).await.unwrap();
        let found = gateway.get_service("web").await.unwrap().unwrap();
        assert_eq!(found.version_index, Some(2));
    }

    #[tokio::test]
    async fn stop_and_remove_unknown_container_fails() {
        let gateway = FakeGateway::new();
        assert!(matches!(
            gateway.stop_container("missing", 5).await,
            Err(GatewayError::ContainerNotFound(_))
        ));
        assert!(matches!(
            gateway.remove_container("missing").await,
            Err(GatewayError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn local_node_id_without_seed_is_not_in_cluster() {
        let gateway = FakeGateway::new();
        assert!(matches!(gateway.local_node_id().await, Err(GatewayError::NotInCluster)));
        gateway.set_local_node_id("node-1").await;
        assert_eq!(gateway.local_node_id().await.unwrap(), "node-1");
    }
}

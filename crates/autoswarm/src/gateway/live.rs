//! `bollard`-backed implementation of `OrchestratorGateway`.

use std::collections::HashMap;
use std::pin::Pin;

use bollard::Docker;
use futures_util::stream::StreamExt;

use super::{BoxFuture, ContainerHandle, EngineEvent, NetworkInfo, OrchestratorGateway};
use crate::error::GatewayError;
use crate::model::{
    ContainerAttributes, LiveService, Mount, MountType, NetworkAttachment, PortBinding,
    RestartPolicyAttrs, ServiceSpec,
};

#[derive(Clone)]
pub struct LiveGateway {
    client: Docker,
}

impl LiveGateway {
    pub fn connect(docker_host: &str) -> Result<Self, GatewayError> {
        let client = if docker_host.is_empty() {
            Docker::connect_with_defaults()?
        } else {
            let socket_path = docker_host.trim_start_matches("unix://");
            Docker::connect_with_socket(socket_path, 120, &bollard::API_DEFAULT_VERSION)?
        };
        Ok(Self { client })
    }
}

impl OrchestratorGateway for LiveGateway {
    fn local_node_id(&self) -> BoxFuture<'_, Result<String, GatewayError>> {
        Box::pin(async move {
            match self.client.inspect_swarm().await {
                Ok(swarm) => swarm
                    .id
                    .filter(|id| !id.is_empty())
                    .ok_or(GatewayError::NotInCluster),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 503, .. }) => {
                    // Worker node: swarm info is still available through system info.
                    let info = self.client.info().await?;
                    info.swarm
                        .and_then(|s| s.node_id)
                        .filter(|id| !id.is_empty())
                        .ok_or(GatewayError::NotInCluster)
                }
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 406, .. }) => {
                    Err(GatewayError::NotInCluster)
                }
                Err(e) => Err(GatewayError::from(e)),
            }
        })
    }

    fn resolve_network<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<NetworkInfo>, GatewayError>> {
        Box::pin(async move {
            let networks = self.list_networks_raw().await?;
            Ok(networks.into_iter().find(|n| n.name == name))
        })
    }

    fn list_networks(&self) -> BoxFuture<'_, Result<Vec<NetworkInfo>, GatewayError>> {
        Box::pin(async move { self.list_networks_raw().await })
    }

    fn list_containers(&self) -> BoxFuture<'_, Result<Vec<ContainerHandle>, GatewayError>> {
        Box::pin(async move {
            let options = Some(bollard::query_parameters::ListContainersOptions {
                all: true,
                ..Default::default()
            });
            let containers = self.client.list_containers(options).await?;
            Ok(containers
                .into_iter()
                .filter_map(|c| {
                    c.id.map(|id| ContainerHandle {
                        id,
                        labels: c.labels.unwrap_or_default(),
                    })
                })
                .collect())
        })
    }

    fn get_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ContainerAttributes, GatewayError>> {
        Box::pin(async move {
            let details = self.client.inspect_container(id, None).await.map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    GatewayError::ContainerNotFound(id.to_string())
                }
                other => GatewayError::from(other),
            })?;
            Ok(container_attributes_from_inspect(details))
        })
    }

    fn list_services(&self) -> BoxFuture<'_, Result<Vec<LiveService>, GatewayError>> {
        Box::pin(async move {
            let services = match self
                .client
                .list_services(None::<bollard::query_parameters::ListServicesOptions>)
                .await
            {
                Ok(services) => services,
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 503, .. }) => {
                    return Err(GatewayError::NotSwarmManager)
                }
                Err(e) => return Err(GatewayError::from(e)),
            };
            Ok(services.into_iter().filter_map(live_service_from_model).collect())
        })
    }

    fn get_service<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<Option<LiveService>, GatewayError>> {
        Box::pin(async move {
            match self.client.inspect_service(name, None).await {
                Ok(service) => Ok(live_service_from_model(service)),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
                Err(e) => Err(GatewayError::from(e)),
            }
        })
    }

    fn create_service<'a>(&'a self, spec: &'a ServiceSpec) -> BoxFuture<'a, Result<String, GatewayError>> {
        Box::pin(async move {
            let model_spec = service_spec_to_model(spec);
            match self.client.create_service(model_spec, None).await {
                Ok(response) => response
                    .id
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| GatewayError::ServiceNotFound(spec.name.clone())),
                Err(bollard::errors::Error::DockerResponseServerError { status_code: 409, .. }) => {
                    Err(GatewayError::AlreadyExists(spec.name.clone()))
                }
                Err(e) => Err(GatewayError::from(e)),
            }
        })
    }

    fn update_service<'a>(
        &'a self,
        service_id: &'a str,
        version: i64,
        labels: &'a HashMap<String, String>,
        task_template: &'a crate::model::TaskTemplateSpec,
        networks: Option<&'a [NetworkAttachment]>,
    ) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let version_i32 = i32::try_from(version).map_err(|_| GatewayError::InvalidVersion(version))?;

            // Fetch the live spec and patch only labels/container-labels/networks
            // onto it, so fields this daemon doesn't manage (image, mounts,
            // restart policy, ...) survive a labels-only reconcile update.
            let current = self.client.inspect_service(service_id, None).await.map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    GatewayError::ServiceNotFound(service_id.to_string())
                }
                other => GatewayError::from(other),
            })?;
            let mut model_spec = current.spec.unwrap_or_default();
            model_spec.labels = Some(labels.clone());

            let mut task_template_model = model_spec.task_template.unwrap_or_default();
            let mut container_spec = task_template_model.container_spec.unwrap_or_default();
            let incoming_labels = &task_template.container_spec.labels;
            if !incoming_labels.is_empty() {
                let mut merged = container_spec.labels.unwrap_or_default();
                merged.extend(incoming_labels.clone());
                container_spec.labels = Some(merged);
            }
            task_template_model.container_spec = Some(container_spec);
            model_spec.task_template = Some(task_template_model);

            if let Some(nets) = networks {
                model_spec.networks = Some(nets.iter().map(network_attachment_to_model).collect());
            }

            let options = bollard::query_parameters::UpdateServiceOptions {
                version: version_i32,
                ..Default::default()
            };
            self.client
                .update_service(service_id, model_spec, options, None)
                .await
                .map_err(|e| match e {
                    bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => {
                        GatewayError::VersionMismatch
                    }
                    bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                        GatewayError::ServiceNotFound(service_id.to_string())
                    }
                    other => GatewayError::from(other),
                })
        })
    }

    fn stop_container<'a>(&'a self, id: &'a str, timeout_secs: u32) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let options = Some(bollard::query_parameters::StopContainerOptions {
                t: Some(timeout_secs as i32),
                ..Default::default()
            });
            self.client.stop_container(id, options).await.map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    GatewayError::ContainerNotFound(id.to_string())
                }
                other => GatewayError::from(other),
            })
        })
    }

    fn remove_container<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Box::pin(async move {
            let options = Some(bollard::query_parameters::RemoveContainerOptions {
                force: true,
                ..Default::default()
            });
            self.client.remove_container(id, options).await.map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    GatewayError::ContainerNotFound(id.to_string())
                }
                other => GatewayError::from(other),
            })
        })
    }

    fn event_stream(&self) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EngineEvent, GatewayError>> + Send + '_>> {
        let mut filters = HashMap::new();
        filters.insert("type", vec!["container"]);
        let options = bollard::query_parameters::EventsOptionsBuilder::default()
            .filters(&filters)
            .build();
        let stream = self.client.events(Some(options)).map(|result| {
            result.map_err(GatewayError::from).map(|event| EngineEvent {
                event_type: event.typ.map(|t| format!("{t:?}").to_lowercase()).unwrap_or_default(),
                action: event.action.unwrap_or_default(),
                id: event.actor.and_then(|actor| actor.id),
            })
        });
        Box::pin(stream)
    }
}

impl LiveGateway {
    async fn list_networks_raw(&self) -> Result<Vec<NetworkInfo>, GatewayError> {
        let networks = self
            .client
            .list_networks(None::<bollard::query_parameters::ListNetworksOptions>)
            .await?;
        Ok(networks
            .into_iter()
            .filter_map(|n| {
                Some(NetworkInfo {
                    id: n.id?,
                    name: n.name.unwrap_or_default(),
                    driver: n.driver.unwrap_or_default(),
                })
            })
            .collect())
    }
}

fn container_attributes_from_inspect(details: bollard::models::ContainerInspectResponse) -> ContainerAttributes {
    let config = details.config.unwrap_or_default();
    let host_config = details.host_config.unwrap_or_default();
    let network_settings = details.network_settings.unwrap_or_default();

    let mounts = details
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| {
            let mount_type = match m.typ?.to_string().to_lowercase().as_str() {
                "bind" => MountType::Bind,
                "volume" => MountType::Volume,
                "tmpfs" => MountType::Tmpfs,
                _ => return None,
            };
            Some(Mount {
                destination: m.destination.unwrap_or_default(),
                source: m.source.unwrap_or_default(),
                mount_type,
                rw: m.rw.unwrap_or(true),
                propagation: m.propagation.map(|p| p.to_string()),
            })
        })
        .collect();

    let networks = network_settings
        .networks
        .unwrap_or_default()
        .into_keys()
        .collect();

    let mut port_bindings: HashMap<String, Vec<PortBinding>> = HashMap::new();
    if let Some(bindings) = host_config.port_bindings {
        for (key, binds) in bindings {
            let entries = binds
                .unwrap_or_default()
                .into_iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.filter(|ip| !ip.is_empty()),
                    host_port: b.host_port.unwrap_or_default(),
                })
                .collect();
            port_bindings.insert(key, entries);
        }
    }

    // `RestartPolicyNameEnum` implements `Display` as the Docker API string
    // (e.g. `on-failure`); `Debug`-formatting it instead would yield the Rust
    // identifier (`ON_DASH_FAILURE`) and silently break the "no"/"on-failure"
    // remapping in `translator::normalize_restart_condition`.
    let restart_policy = host_config
        .restart_policy
        .map(|rp| RestartPolicyAttrs {
            name: rp.name.map(|n| n.to_string()),
            maximum_retry_count: rp.maximum_retry_count,
        })
        .unwrap_or_default();

    ContainerAttributes {
        id: details.id.unwrap_or_default(),
        name: details.name.unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        user: config.user.filter(|u| !u.is_empty()),
        working_dir: config.working_dir.filter(|w| !w.is_empty()),
        entrypoint: config.entrypoint,
        cmd: config.cmd,
        tty: config.tty.unwrap_or(false),
        labels: config.labels.unwrap_or_default(),
        restart_policy,
        port_bindings,
        networks,
        mounts,
    }
}

fn live_service_from_model(service: bollard::models::Service) -> Option<LiveService> {
    let spec = service.spec?;
    let id = service.id?;
    let name = spec.name?;
    let version_index = service.version.and_then(|v| v.index);
    let task_template = spec.task_template.unwrap_or_default();
    let container_labels = task_template
        .container_spec
        .and_then(|cs| cs.labels)
        .unwrap_or_default();
    let networks = spec
        .networks
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| {
            Some(NetworkAttachment {
                target: n.target?,
                aliases: n.aliases.unwrap_or_default(),
            })
        })
        .collect();

    Some(LiveService {
        id,
        name,
        version_index,
        labels: spec.labels.unwrap_or_default(),
        networks,
        container_labels,
    })
}

fn network_attachment_to_model(attachment: &NetworkAttachment) -> bollard::models::NetworkAttachmentConfig {
    bollard::models::NetworkAttachmentConfig {
        target: Some(attachment.target.clone()),
        aliases: if attachment.aliases.is_empty() {
            None
        } else {
            Some(attachment.aliases.clone())
        },
        ..Default::default()
    }
}

fn task_template_to_model(template: &crate::model::TaskTemplateSpec) -> bollard::models::TaskSpec {
    let cs = &template.container_spec;
    bollard::models::TaskSpec {
        container_spec: Some(bollard::models::TaskSpecContainerSpec {
            image: cs.image.clone(),
            env: cs.env.clone(),
            user: cs.user.clone(),
            dir: cs.working_dir.clone(),
            command: cs.command.clone(),
            args: cs.args.clone(),
            tty: Some(cs.tty),
            labels: if cs.labels.is_empty() { None } else { Some(cs.labels.clone()) },
            mounts: cs.mounts.as_ref().map(|mounts| {
                mounts
                    .iter()
                    .map(|m| bollard::models::Mount {
                        target: Some(m.destination.clone()),
                        source: Some(m.source.clone()),
                        typ: Some(match m.mount_type {
                            MountType::Bind => bollard::models::MountTypeEnum::BIND,
                            MountType::Volume => bollard::models::MountTypeEnum::VOLUME,
                            MountType::Tmpfs => bollard::models::MountTypeEnum::TMPFS,
                        }),
                        read_only: Some(!m.rw),
                        bind_options: if matches!(m.mount_type, MountType::Bind) {
                            Some(bollard::models::MountBindOptions {
                                propagation: m.propagation.as_deref().map(|p| match p {
                                    "rshared" => bollard::models::MountBindOptionsPropagationEnum::RSHARED,
                                    "shared" => bollard::models::MountBindOptionsPropagationEnum::SHARED,
                                    "rslave" => bollard::models::MountBindOptionsPropagationEnum::RSLAVE,
                                    "slave" => bollard::models::MountBindOptionsPropagationEnum::SLAVE,
                                    _ => bollard::models::MountBindOptionsPropagationEnum::RPRIVATE,
                                }),
                                ..Default::default()
                            })
                        } else {
                            None
                        },
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
        restart_policy: Some(bollard::models::TaskSpecRestartPolicy {
            condition: Some(match template.restart_policy.condition.as_str() {
                "none" => bollard::models::TaskSpecRestartPolicyConditionEnum::NONE,
                "on-failure" => bollard::models::TaskSpecRestartPolicyConditionEnum::ON_DASH_FAILURE,
                _ => bollard::models::TaskSpecRestartPolicyConditionEnum::ANY,
            }),
            max_attempts: template.restart_policy.max_attempts,
            ..Default::default()
        }),
        placement: if template.placement.constraints.is_empty() {
            None
        } else {
            Some(bollard::models::TaskSpecPlacement {
                constraints: Some(template.placement.constraints.clone()),
                ..Default::default()
            })
        },
        ..Default::default()
    }
}

fn service_spec_to_model(spec: &ServiceSpec) -> bollard::models::ServiceSpec {
    bollard::models::ServiceSpec {
        name: Some(spec.name.clone()),
        labels: if spec.labels.is_empty() { None } else { Some(spec.labels.clone()) },
        mode: Some(bollard::models::ServiceSpecMode {
            replicated: Some(bollard::models::ServiceSpecModeReplicated { replicas: Some(1) }),
            ..Default::default()
        }),
        task_template: Some(task_template_to_model(&spec.task_template)),
        networks: if spec.networks.is_empty() {
            None
        } else {
            Some(spec.networks.iter().map(network_attachment_to_model).collect())
        },
        endpoint_spec: if spec.ports.is_empty() {
            None
        } else {
            Some(bollard::models::EndpointSpec {
                ports: Some(
                    spec.ports
                        .iter()
                        .map(|p| bollard::models::EndpointPortConfig {
                            protocol: Some(match p.protocol.as_str() {
                                "udp" => bollard::models::EndpointPortConfigProtocolEnum::UDP,
                                "sctp" => bollard::models::EndpointPortConfigProtocolEnum::SCTP,
                                _ => bollard::models::EndpointPortConfigProtocolEnum::TCP,
                            }),
                            target_port: Some(p.target_port as i64),
                            published_port: Some(p.published_port as i64),
                            publish_mode: Some(match p.publish_mode.as_str() {
                                "host" => bollard::models::EndpointPortConfigPublishModeEnum::HOST,
                                _ => bollard::models::EndpointPortConfigPublishModeEnum::INGRESS,
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            })
        },
        ..Default::default()
    }
}

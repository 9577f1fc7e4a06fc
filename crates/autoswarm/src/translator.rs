//! Container → service-spec translation (§3, §8).
//!
//! One pure function, `translate`, builds a `ServiceSpec` from a container's
//! inspected attributes. Nothing here talks to the engine; callers resolve
//! overlay network ids and the local node id ahead of time and pass them in.

use std::collections::HashMap;

use crate::gateway::NetworkInfo;
use crate::model::{
    ContainerAttributes, ContainerSpecAttrs, Mount, MountType, NetworkAttachment, PlacementSpec,
    RestartPolicySpec, ServicePort, ServiceSpec, TaskTemplateSpec,
};

pub const MANAGED_LABEL: &str = "autoswarm.managed";
pub const IGNORED_LABEL: &str = "autoswarm.ignore";
pub const SOURCE_LABEL: &str = "autoswarm.source";

const SWARM_RESERVED_LABELS: &[&str] = &[
    "com.docker.swarm.service.name",
    "com.docker.swarm.task",
    "com.docker.compose.project",
    MANAGED_LABEL,
];

/// True when the container already carries a swarm-managed or compose label
/// and should be left alone by the sweep/event loops.
pub fn is_swarm_container(labels: &HashMap<String, String>) -> bool {
    SWARM_RESERVED_LABELS.iter().any(|key| labels.contains_key(*key))
}

/// True when the operator opted this container out via `autoswarm.ignore=true`.
pub fn should_ignore(labels: &HashMap<String, String>) -> bool {
    labels
        .get(IGNORED_LABEL)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Derive a DNS/swarm-safe service name from the container's engine name.
pub fn derive_service_name(container: &ContainerAttributes) -> String {
    let raw_name = container.name.trim_start_matches('/');
    let raw_name = if raw_name.is_empty() {
        &container.id[..container.id.len().min(12)]
    } else {
        raw_name
    };

    let mut sanitized = String::with_capacity(raw_name.len());
    for ch in raw_name.chars() {
        if ch.is_alphanumeric() {
            sanitized.push(ch.to_ascii_lowercase());
        } else if ch == '-' || ch == '_' {
            sanitized.push(ch);
        } else {
            sanitized.push('-');
        }
    }
    let name = sanitized.trim_matches('-').to_string();
    if name.is_empty() {
        format!("autoswarm-{}", &container.id[..container.id.len().min(8)])
    } else {
        name
    }
}

/// Translate the container's mounts into swarm mount entries, defaulting
/// bind-mount propagation to `rprivate` when unset.
pub fn collect_mounts(container: &ContainerAttributes) -> Vec<Mount> {
    container
        .mounts
        .iter()
        .filter(|m| !m.destination.is_empty() && !m.source.is_empty())
        .map(|m| Mount {
            destination: m.destination.clone(),
            source: m.source.clone(),
            mount_type: m.mount_type,
            rw: m.rw,
            propagation: match m.mount_type {
                MountType::Bind => Some(m.propagation.clone().unwrap_or_else(|| "rprivate".to_string())),
                _ => None,
            },
        })
        .collect()
}

/// Translate the container's network attachments into service network
/// attachments: only overlay networks are carried forward (bridge/host/none
/// are skipped), and the ingress network is always included.
pub fn collect_networks(
    container: &ContainerAttributes,
    available_networks: &[NetworkInfo],
    ingress_network_name: &str,
) -> Vec<NetworkAttachment> {
    let mut names: std::collections::BTreeSet<String> = container
        .networks
        .iter()
        .filter(|n| !matches!(n.as_str(), "bridge" | "host" | "none"))
        .cloned()
        .collect();
    if !ingress_network_name.is_empty() {
        names.insert(ingress_network_name.to_string());
    }

    let mut networks = Vec::new();
    for name in names {
        match available_networks.iter().find(|n| n.name == name) {
            Some(net) if net.driver == "overlay" => {
                networks.push(NetworkAttachment { target: net.id.clone(), aliases: Vec::new() });
            }
            Some(net) => {
                tracing::warn!(network = %name, driver = %net.driver, "network is not an overlay network; skipping");
            }
            None => {
                tracing::warn!(network = %name, "overlay network not found; create it manually if required");
            }
        }
    }
    networks
}

/// Translate published port bindings into swarm service ports.
pub fn collect_ports(container: &ContainerAttributes) -> Vec<ServicePort> {
    let mut ports = Vec::new();
    for (key, bindings) in &container.port_bindings {
        if bindings.is_empty() {
            continue;
        }
        let Some((port_part, proto)) = key.split_once('/') else { continue };
        let Ok(target_port) = port_part.parse::<u16>() else { continue };
        for binding in bindings {
            let Ok(published_port) = binding.host_port.parse::<u16>() else { continue };
            let publish_mode = match binding.host_ip.as_deref() {
                None | Some("") | Some("0.0.0.0") => "ingress",
                _ => "host",
            };
            ports.push(ServicePort {
                protocol: proto.to_string(),
                target_port,
                published_port,
                publish_mode: publish_mode.to_string(),
            });
        }
    }
    ports
}

/// True when any collected mount pins this service to the container's
/// current node: any bind mount, or any named volume not backed by the
/// default Docker volume storage path.
pub fn requires_local_constraint(mounts: &[Mount]) -> bool {
    mounts.iter().any(|m| match m.mount_type {
        MountType::Bind => true,
        MountType::Volume => !m.source.starts_with("/var/lib/docker/volumes/"),
        MountType::Tmpfs => false,
    })
}

fn normalize_restart_condition(raw: Option<&str>) -> String {
    match raw.filter(|name| !name.is_empty()) {
        Some("no") => "none".to_string(),
        Some(other) => other.to_string(),
        None => "any".to_string(),
    }
}

/// Build the full service spec this daemon will ask the gateway to create.
pub fn translate(
    container: &ContainerAttributes,
    local_node_id: &str,
    available_networks: &[NetworkInfo],
    ingress_network_name: &str,
) -> ServiceSpec {
    let name = derive_service_name(container);
    let mounts = collect_mounts(container);
    let networks = collect_networks(container, available_networks, ingress_network_name);
    let ports = collect_ports(container);

    let container_spec = ContainerSpecAttrs {
        image: Some(container.image.clone()).filter(|s| !s.is_empty()),
        env: Some(container.env.clone()).filter(|v| !v.is_empty()),
        user: container.user.clone().filter(|s| !s.is_empty()),
        working_dir: container.working_dir.clone().filter(|s| !s.is_empty()),
        command: container.entrypoint.clone().filter(|v| !v.is_empty()),
        args: container.cmd.clone().filter(|v| !v.is_empty()),
        tty: container.tty,
        mounts: Some(mounts.clone()).filter(|v| !v.is_empty()),
        labels: HashMap::new(),
    };

    let condition = normalize_restart_condition(container.restart_policy.name.as_deref());
    let restart_policy = RestartPolicySpec {
        condition,
        max_attempts: container.restart_policy.maximum_retry_count.filter(|c| *c > 0),
    };

    let placement = if requires_local_constraint(&mounts) {
        PlacementSpec { constraints: vec![format!("node.id=={local_node_id}")] }
    } else {
        PlacementSpec::default()
    };

    let mut labels = HashMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(SOURCE_LABEL.to_string(), container.name.trim_start_matches('/').to_string());

    ServiceSpec {
        name,
        labels,
        task_template: TaskTemplateSpec { container_spec, restart_policy, placement },
        networks,
        ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortBinding, RestartPolicyAttrs};

    fn base_container() -> ContainerAttributes {
        ContainerAttributes {
            id: "abcdef1234567890".to_string(),
            name: "/my-app".to_string(),
            image: "nginx:latest".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn derive_service_name_strips_leading_slash_and_lowercases() {
        let container = base_container();
        assert_eq!(derive_service_name(&container), "my-app");
    }

    #[test]
    fn derive_service_name_replaces_invalid_characters() {
        let mut container = base_container();
        container.name = "/My App!@#2".to_string();
        assert_eq!(derive_service_name(&container), "my-app-2");
    }

    #[test]
    fn derive_service_name_falls_back_to_id_when_name_empty() {
        let mut container = base_container();
        container.name = String::new();
        let name = derive_service_name(&container);
        assert_eq!(name, "abcdef123456");
    }

    #[test]
    fn is_swarm_container_detects_compose_label() {
        let mut labels = HashMap::new();
        labels.insert("com.docker.compose.project".to_string(), "stack".to_string());
        assert!(is_swarm_container(&labels));
    }

    #[test]
    fn should_ignore_is_case_insensitive() {
        let mut labels = HashMap::new();
        labels.insert(IGNORED_LABEL.to_string(), "TRUE".to_string());
        assert!(should_ignore(&labels));
    }

    #[test]
    fn collect_networks_skips_bridge_host_none_and_adds_ingress() {
        let mut container = base_container();
        container.networks = vec!["bridge".to_string(), "app-net".to_string()];
        let available = vec![
            NetworkInfo { id: "net-app".to_string(), name: "app-net".to_string(), driver: "overlay".to_string() },
            NetworkInfo { id: "net-ingress".to_string(), name: "traefik-public".to_string(), driver: "overlay".to_string() },
        ];
        let networks = collect_networks(&container, &available, "traefik-public");
        let targets: std::collections::BTreeSet<_> = networks.iter().map(|n| n.target.clone()).collect();
        assert_eq!(targets.len(), 2);
        assert!(targets.contains("net-app"));
        assert!(targets.contains("net-ingress"));
    }

    #[test]
    fn collect_networks_skips_non_overlay_driver() {
        let mut container = base_container();
        container.networks = vec!["legacy-bridge-net".to_string()];
        let available = vec![NetworkInfo {
            id: "net1".to_string(),
            name: "legacy-bridge-net".to_string(),
            driver: "bridge".to_string(),
        }];
        let networks = collect_networks(&container, &available, "");
        assert!(networks.is_empty());
    }

    #[test]
    fn collect_ports_maps_host_ip_to_publish_mode() {
        let mut container = base_container();
        container.port_bindings.insert(
            "80/tcp".to_string(),
            vec![PortBinding { host_ip: None, host_port: "8080".to_string() }],
        );
        container.port_bindings.insert(
            "443/tcp".to_string(),
            vec![PortBinding { host_ip: Some("10.0.0.1".to_string()), host_port: "8443".to_string() }],
        );
        let ports = collect_ports(&container);
        assert_eq!(ports.len(), 2);
        let ingress = ports.iter().find(|p| p.target_port == 80).unwrap();
        assert_eq!(ingress.publish_mode, "ingress");
        let host = ports.iter().find(|p| p.target_port == 443).unwrap();
        assert_eq!(host.publish_mode, "host");
    }

    #[test]
    fn requires_local_constraint_true_for_bind_mount() {
        let mounts = vec![Mount {
            destination: "/data".to_string(),
            source: "/host/data".to_string(),
            mount_type: MountType::Bind,
            rw: true,
            propagation: Some("rprivate".to_string()),
        }];
        assert!(requires_local_constraint(&mounts));
    }

    #[test]
    fn requires_local_constraint_false_for_default_named_volume() {
        let mounts = vec![Mount {
            destination: "/data".to_string(),
            source: "/var/lib/docker/volumes/app_data/_data".to_string(),
            mount_type: MountType::Volume,
            rw: true,
            propagation: None,
        }];
        assert!(!requires_local_constraint(&mounts));
    }

    #[test]
    fn requires_local_constraint_true_for_external_named_volume() {
        let mounts = vec![Mount {
            destination: "/data".to_string(),
            source: "external-volume".to_string(),
            mount_type: MountType::Volume,
            rw: true,
            propagation: None,
        }];
        assert!(requires_local_constraint(&mounts));
    }

    #[test]
    fn restart_condition_no_remaps_to_none() {
        let mut container = base_container();
        container.restart_policy = RestartPolicyAttrs { name: Some("no".to_string()), maximum_retry_count: None };
        let spec = translate(&container, "node-1", &[], "");
        assert_eq!(spec.task_template.restart_policy.condition, "none");
    }

    #[test]
    fn restart_condition_empty_or_missing_defaults_to_any() {
        let mut container = base_container();
        container.restart_policy = RestartPolicyAttrs { name: Some(String::new()), maximum_retry_count: None };
        let spec = translate(&container, "node-1", &[], "");
        assert_eq!(spec.task_template.restart_policy.condition, "any");

        container.restart_policy = RestartPolicyAttrs { name: None, maximum_retry_count: None };
        let spec = translate(&container, "node-1", &[], "");
        assert_eq!(spec.task_template.restart_policy.condition, "any");
    }

    #[test]
    fn restart_condition_on_failure_passes_through() {
        let mut container = base_container();
        container.restart_policy = RestartPolicyAttrs { name: Some("on-failure".to_string()), maximum_retry_count: None };
        let spec = translate(&container, "node-1", &[], "");
        assert_eq!(spec.task_template.restart_policy.condition, "on-failure");
    }

    #[test]
    fn translate_sets_managed_and_source_labels() {
        let container = base_container();
        let spec = translate(&container, "node-1", &[], "");
        assert_eq!(spec.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(spec.labels.get(SOURCE_LABEL).map(String::as_str), Some("my-app"));
    }

    #[test]
    fn translate_adds_placement_constraint_for_bind_mounts() {
        let mut container = base_container();
        container.mounts.push(Mount {
            destination: "/data".to_string(),
            source: "/host/data".to_string(),
            mount_type: MountType::Bind,
            rw: true,
            propagation: None,
        });
        let spec = translate(&container, "node-42", &[], "");
        assert_eq!(spec.task_template.placement.constraints, vec!["node.id==node-42".to_string()]);
    }
}

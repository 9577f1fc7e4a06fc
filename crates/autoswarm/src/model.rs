//! Data model — the shapes the translator and reconciler operate on.
//!
//! `ContainerAttributes` mirrors the slice of a Docker container inspect
//! response this daemon actually reads. `ServiceSpec` and friends mirror the
//! slice of a swarm service spec this daemon creates and patches. Field
//! presence follows one rule throughout: `None` means "not specified, leave
//! the orchestrator default"; an empty `Vec`/`HashMap` means "specified as
//! empty" and is collapsed to `None` by the translator's builder step before
//! it reaches the orchestrator (see `translator::drop_empty`).

use std::collections::HashMap;

/// A mount type as reported by the container engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountType {
    Bind,
    Volume,
    Tmpfs,
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub destination: String,
    pub source: String,
    pub mount_type: MountType,
    pub rw: bool,
    /// Bind-mount propagation mode (`rprivate`, `rshared`, …). Only meaningful
    /// for `MountType::Bind`.
    pub propagation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PortBinding {
    pub host_ip: Option<String>,
    pub host_port: String,
}

#[derive(Debug, Clone, Default)]
pub struct RestartPolicyAttrs {
    pub name: Option<String>,
    pub maximum_retry_count: Option<i64>,
}

/// The slice of an inspected container this daemon reads to translate it
/// into a service spec.
#[derive(Debug, Clone, Default)]
pub struct ContainerAttributes {
    pub id: String,
    /// Container name, as reported by the engine (may carry a leading `/`).
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub tty: bool,
    pub labels: HashMap<String, String>,
    pub restart_policy: RestartPolicyAttrs,
    /// Keyed by `"<port>/<proto>"`.
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    /// Keyed by network name.
    pub networks: Vec<String>,
    pub mounts: Vec<Mount>,
}

// ── Service spec (translation output / reconciler patch target) ────────

#[derive(Debug, Clone, Default)]
pub struct ContainerSpecAttrs {
    pub image: Option<String>,
    pub env: Option<Vec<String>>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub tty: bool,
    pub mounts: Option<Vec<Mount>>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RestartPolicySpec {
    /// `"any"`, `"none"` or `"on-failure"`.
    pub condition: String,
    pub max_attempts: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct PlacementSpec {
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NetworkAttachment {
    pub target: String,
    /// Only emitted when non-empty — see DESIGN.md Open Question (b).
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ServicePort {
    pub protocol: String,
    pub target_port: u16,
    pub published_port: u16,
    /// `"host"` or `"ingress"`.
    pub publish_mode: String,
}

#[derive(Debug, Clone)]
pub struct TaskTemplateSpec {
    pub container_spec: ContainerSpecAttrs,
    pub restart_policy: RestartPolicySpec,
    pub placement: PlacementSpec,
}

#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub labels: HashMap<String, String>,
    pub task_template: TaskTemplateSpec,
    pub networks: Vec<NetworkAttachment>,
    pub ports: Vec<ServicePort>,
}

// ── Control-plane application record ────────────────────────────────────

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Domain {
    pub host: Option<String>,
    #[serde(rename = "domainType")]
    pub domain_type: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "uniqueConfigKey")]
    pub unique_config_key: Option<String>,
    #[serde(rename = "domainId")]
    pub domain_id: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ApplicationNetwork {
    #[serde(rename = "Target")]
    pub target: Option<String>,
    #[serde(rename = "Aliases", default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, Default)]
pub struct Application {
    #[serde(rename = "applicationId")]
    pub application_id: String,
    #[serde(rename = "appName")]
    pub app_name: String,
    #[serde(rename = "labelsSwarm", default)]
    pub labels_swarm: HashMap<String, String>,
    #[serde(rename = "networkSwarm", default)]
    pub network_swarm: Vec<ApplicationNetwork>,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

// ── Live service view (read by the reconciler) ──────────────────────────

/// The slice of a live service the reconciler reads and diffs against.
#[derive(Debug, Clone)]
pub struct LiveService {
    pub id: String,
    pub name: String,
    pub version_index: Option<i64>,
    pub labels: HashMap<String, String>,
    pub networks: Vec<NetworkAttachment>,
    pub container_labels: HashMap<String, String>,
}

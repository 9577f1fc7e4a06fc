//! Control-plane ↔ swarm reconciliation (§4.4, §4.5).
//!
//! Pulls application metadata (labels, networks, domains) from the control
//! plane and pushes it onto the matching swarm service whenever the two
//! diverge. Pure helpers (`build_desired_labels`, `build_desired_networks`,
//! the `*_match` comparisons) are unit-tested directly; `reconcile_*` drives
//! them against an `OrchestratorGateway` and a `ControlPlaneClient`.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info};

use crate::control_plane::ControlPlaneClient;
use crate::error::ReconcileError;
use crate::gateway::OrchestratorGateway;
use crate::model::{Application, ApplicationNetwork, NetworkAttachment};

static HOST_RULE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Host\(`([^`]+)`\)").unwrap());

/// Rewrite a Traefik router rule to `Host(\`host\`)` if it doesn't already
/// carry that exact host. Returns `(value, changed)`.
///
/// TODO: this replaces the entire rule value, discarding any `&&`-joined
/// `PathPrefix`/`Headers` clauses that coexisted with the `Host(...)` match.
/// Should instead substitute only the `Host(\`...\`)` substring and leave the
/// rest of the rule intact.
pub fn normalize_router_rule(value: &str, host: &str) -> (String, bool) {
    if let Some(captures) = HOST_RULE_RE.captures(value) {
        if captures.get(1).map(|m| m.as_str()) == Some(host) {
            return (value.to_string(), false);
        }
    }
    (format!("Host(`{host}`)"), true)
}

/// Build the labels a service should carry from an application's
/// `labelsSwarm`, rewriting any `*.rule` Host(...) label to the
/// application's primary domain.
pub fn build_desired_labels(application: &Application) -> (HashMap<String, String>, bool) {
    let mut labels = application.labels_swarm.clone();

    let current_host = labels.iter().find_map(|(key, value)| {
        if key.ends_with(".rule") && value.contains("Host(") {
            HOST_RULE_RE.captures(value).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
        } else {
            None
        }
    });

    let mut primary_domain = current_host
        .as_deref()
        .and_then(|host| application.domains.iter().find(|d| d.host.as_deref() == Some(host)));

    if primary_domain.is_none() {
        let mut application_domains: Vec<_> =
            application.domains.iter().filter(|d| d.domain_type.as_deref() == Some("application")).collect();
        application_domains.sort_by_key(|d| {
            d.created_at.clone().or_else(|| d.unique_config_key.clone()).unwrap_or_default()
        });
        primary_domain = application_domains.last().copied();
    }

    let mut changed = false;
    if let Some(domain) = primary_domain {
        if let Some(host) = domain.host.as_deref() {
            for (key, value) in labels.clone().into_iter() {
                if key.ends_with(".rule") && value.contains("Host(") {
                    let (new_value, modified) = normalize_router_rule(&value, host);
                    if modified {
                        labels.insert(key, new_value);
                        changed = true;
                    }
                }
            }
        }
    }

    (labels, changed)
}

/// Build the desired network attachment list from an application's
/// `networkSwarm`, always ensuring the ingress network is attached.
pub fn build_desired_networks(application: &Application, ingress_network_id: &str) -> Vec<NetworkAttachment> {
    let mut networks: Vec<NetworkAttachment> = application
        .network_swarm
        .iter()
        .filter_map(|entry| {
            entry.target.as_ref().map(|target| NetworkAttachment {
                target: target.clone(),
                aliases: entry.aliases.clone().unwrap_or_default(),
            })
        })
        .collect();

    if !ingress_network_id.is_empty() && !networks.iter().any(|n| n.target == ingress_network_id) {
        networks.push(NetworkAttachment { target: ingress_network_id.to_string(), aliases: Vec::new() });
    } else if ingress_network_id.is_empty() {
        debug!("ingress network unresolved; skipping auto-attach");
    }

    networks
}

pub fn service_labels_match(current: &HashMap<String, String>, desired: &HashMap<String, String>) -> bool {
    desired.iter().all(|(key, value)| current.get(key) == Some(value))
}

pub fn service_networks_match(current: &[NetworkAttachment], desired: &[NetworkAttachment]) -> bool {
    let current_targets: HashSet<_> = current.iter().map(|n| n.target.as_str()).collect();
    let desired_targets: HashSet<_> = desired.iter().map(|n| n.target.as_str()).collect();
    current_targets == desired_targets
}

fn application_networks_for_write(application: &Application) -> Vec<ApplicationNetwork> {
    application.network_swarm.clone()
}

/// Align one live service with its matching control-plane application.
/// A no-op if already aligned, if the application carries no `labelsSwarm`,
/// or if the service is missing version metadata (logged and skipped, not
/// an error — a transient read races with a concurrent update elsewhere).
pub async fn reconcile_application(
    gateway: &dyn OrchestratorGateway,
    control_plane: &ControlPlaneClient,
    application: &Application,
    ingress_network_id: &str,
) -> Result<(), ReconcileError> {
    let Some(service) = gateway.get_service(&application.app_name).await? else {
        debug!(application = %application.app_name, "no matching swarm service for application");
        return Ok(());
    };

    let (desired_labels, labels_changed) = build_desired_labels(application);
    if desired_labels.is_empty() {
        debug!(application = %application.app_name, "application has no labelsSwarm defined");
        return Ok(());
    }
    let desired_networks = build_desired_networks(application, ingress_network_id);

    let needs_label_update = !service_labels_match(&service.labels, &desired_labels);
    let needs_network_update = !service_networks_match(&service.networks, &desired_networks);
    let needs_container_update = !service_labels_match(&service.container_labels, &desired_labels);

    if !(needs_label_update || needs_network_update || needs_container_update) {
        debug!(service = %service.name, "already aligned with control plane");
        return Ok(());
    }

    let version = service
        .version_index
        .ok_or_else(|| ReconcileError::MissingVersion(service.name.clone()))?;

    let mut merged_service_labels = service.labels.clone();
    merged_service_labels.extend(desired_labels.clone());

    let mut merged_container_labels = service.container_labels.clone();
    merged_container_labels.extend(desired_labels.clone());

    // Only labels are patched here; update_service is a label/network-only
    // write path, so the rest of the container spec is left at its default
    // and the gateway must not clobber the live service's other fields with it.
    let task_template = crate::model::TaskTemplateSpec {
        container_spec: crate::model::ContainerSpecAttrs { labels: merged_container_labels, ..Default::default() },
        restart_policy: crate::model::RestartPolicySpec { condition: "any".to_string(), max_attempts: None },
        placement: crate::model::PlacementSpec::default(),
    };

    gateway
        .update_service(
            &service.id,
            version,
            &merged_service_labels,
            &task_template,
            Some(&desired_networks),
        )
        .await?;

    info!(
        service = %service.name,
        labels_updated = needs_label_update || needs_container_update,
        networks_updated = needs_network_update,
        "updated service to match control plane"
    );

    if labels_changed {
        control_plane
            .update_application(
                &application.application_id,
                Some(&desired_labels),
                Some(&application_networks_for_write(application)),
            )
            .await;
    }

    Ok(())
}

/// Reconcile a single service by name, looked up against the control-plane
/// cache. Called immediately after a container is converted to a service,
/// and once per service during a full sweep.
pub async fn reconcile_service_by_name(
    gateway: &dyn OrchestratorGateway,
    control_plane: &ControlPlaneClient,
    service_name: &str,
    ingress_network_id: &str,
) -> Result<(), ReconcileError> {
    if !control_plane.enabled() {
        return Ok(());
    }
    let Some(application) = control_plane.find_application_by_name(service_name).await else {
        debug!(service = %service_name, "no control-plane application mapping found");
        return Ok(());
    };
    reconcile_application(gateway, control_plane, &application, ingress_network_id).await
}

/// Reconcile every control-plane application against its matching service.
/// Logs and continues past individual failures so one bad service doesn't
/// stall the whole sweep.
pub async fn reconcile_all(
    gateway: &dyn OrchestratorGateway,
    control_plane: &ControlPlaneClient,
    ingress_network_id: &str,
) {
    if !control_plane.enabled() {
        debug!("control-plane integration disabled; skipping reconciliation sweep");
        return;
    }
    let applications = control_plane.list_applications().await;
    for application in &applications {
        if application.app_name.is_empty() {
            continue;
        }
        if let Err(err) = reconcile_application(gateway, control_plane, application, ingress_network_id).await {
            error!(application = %application.app_name, error = %err, "failed to reconcile application");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Domain;

    fn app_with_domain(host: &str, domain_type: &str) -> Application {
        Application {
            application_id: "app-1".to_string(),
            app_name: "web".to_string(),
            labels_swarm: HashMap::new(),
            network_swarm: Vec::new(),
            domains: vec![Domain {
                host: Some(host.to_string()),
                domain_type: Some(domain_type.to_string()),
                created_at: Some("2024-01-01".to_string()),
                unique_config_key: None,
                domain_id: Some("dom-1".to_string()),
            }],
        }
    }

    #[test]
    fn normalize_router_rule_leaves_matching_host_untouched() {
        let (value, changed) = normalize_router_rule("Host(`example.com`)", "example.com");
        assert_eq!(value, "Host(`example.com`)");
        assert!(!changed);
    }

    #[test]
    fn normalize_router_rule_rewrites_mismatched_host() {
        let (value, changed) = normalize_router_rule("Host(`old.com`)", "new.com");
        assert_eq!(value, "Host(`new.com`)");
        assert!(changed);
    }

    #[test]
    fn build_desired_labels_rewrites_rule_to_primary_domain() {
        let mut application = app_with_domain("example.com", "application");
        application
            .labels_swarm
            .insert("traefik.http.routers.web.rule".to_string(), "Host(`stale.com`)".to_string());
        let (labels, changed) = build_desired_labels(&application);
        assert!(changed);
        assert_eq!(
            labels.get("traefik.http.routers.web.rule").map(String::as_str),
            Some("Host(`example.com`)")
        );
    }

    #[test]
    fn build_desired_labels_no_change_when_already_aligned() {
        let mut application = app_with_domain("example.com", "application");
        application
            .labels_swarm
            .insert("traefik.http.routers.web.rule".to_string(), "Host(`example.com`)".to_string());
        let (_, changed) = build_desired_labels(&application);
        assert!(!changed);
    }

    #[test]
    fn build_desired_networks_always_attaches_ingress() {
        let application = Application { app_name: "web".to_string(), ..Default::default() };
        let networks = build_desired_networks(&application, "ingress-net-id");
        assert_eq!(networks.len(), 1);
        assert_eq!(networks[0].target, "ingress-net-id");
    }

    #[test]
    fn build_desired_networks_does_not_duplicate_existing_ingress() {
        let mut application = Application { app_name: "web".to_string(), ..Default::default() };
        application.network_swarm.push(ApplicationNetwork { target: Some("ingress-net-id".to_string()), aliases: None });
        let networks = build_desired_networks(&application, "ingress-net-id");
        assert_eq!(networks.len(), 1);
    }

    #[test]
    fn service_labels_match_only_checks_desired_keys() {
        let mut current = HashMap::new();
        current.insert("a".to_string(), "1".to_string());
        current.insert("extra".to_string(), "ignored".to_string());
        let mut desired = HashMap::new();
        desired.insert("a".to_string(), "1".to_string());
        assert!(service_labels_match(&current, &desired));
    }

    #[test]
    fn service_networks_match_ignores_order() {
        let current = vec![
            NetworkAttachment { target: "a".to_string(), aliases: vec![] },
            NetworkAttachment { target: "b".to_string(), aliases: vec![] },
        ];
        let desired = vec![
            NetworkAttachment { target: "b".to_string(), aliases: vec![] },
            NetworkAttachment { target: "a".to_string(), aliases: vec![] },
        ];
        assert!(service_networks_match(&current, &desired));
    }
}

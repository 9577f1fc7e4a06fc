//! Control-plane client (§4.2) — a thin TRPC wrapper around the Dokploy-style
//! application registry, with a TTL-cached read path.
//!
//! The cache is a plain `Mutex<CacheState>`. The lock is only ever held long
//! enough to clone the snapshot out or swap a fresh one in — never across an
//! await point — following the same discipline the cluster crate's agent
//! pool uses around its per-connection client handles.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::ControlPlaneError;
use crate::model::Application;

struct CacheState {
    applications: Vec<Application>,
    refreshed_at: Option<Instant>,
}

impl Default for CacheState {
    fn default() -> Self {
        Self { applications: Vec::new(), refreshed_at: None }
    }
}

/// TRPC client for the control-plane application registry.
pub struct ControlPlaneClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    cache_ttl: Duration,
    cache: Mutex<CacheState>,
}

impl ControlPlaneClient {
    pub fn new(base_url: String, api_key: Option<String>, cache_ttl: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
            cache_ttl,
            cache: Mutex::new(CacheState::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.is_empty())
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            reqwest::header::HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                .unwrap_or(reqwest::header::HeaderValue::from_static("")),
        );
        headers.insert("content-type", reqwest::header::HeaderValue::from_static("application/json"));
        headers
    }

    /// Unwraps a TRPC response envelope: `{"result":{"data":{"json": ...}}}`,
    /// treating a top-level `"error"` key as a logical (non-transport) failure.
    fn unwrap_envelope(body: serde_json::Value, endpoint: &str) -> Result<serde_json::Value, ControlPlaneError> {
        if let Some(error) = body.get("error") {
            return Err(ControlPlaneError::LogicalError(format!("{endpoint}: {error}")));
        }
        Ok(body
            .get("result")
            .and_then(|r| r.get("data"))
            .and_then(|d| d.get("json"))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn refresh_cache(&self, force: bool) {
        if !self.enabled() {
            return;
        }
        {
            let state = self.cache.lock().await;
            if !force {
                if let Some(refreshed_at) = state.refreshed_at {
                    if refreshed_at.elapsed() < self.cache_ttl {
                        return;
                    }
                }
            }
        }

        match self.fetch_applications().await {
            Ok(applications) => {
                let mut state = self.cache.lock().await;
                state.applications = applications;
                state.refreshed_at = Some(Instant::now());
                debug!(count = state.applications.len(), "control-plane cache refreshed");
            }
            Err(err) => {
                error!(error = %err, "failed to refresh control-plane application cache");
            }
        }
    }

    async fn fetch_applications(&self) -> Result<Vec<Application>, ControlPlaneError> {
        let url = format!("{}/api/trpc/project.all", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("input", "{}")])
            .headers(self.headers())
            .timeout(Duration::from_secs(15))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        let payload = Self::unwrap_envelope(body, "project.all")?;

        let mut applications = Vec::new();
        for project in payload.as_array().into_iter().flatten() {
            for environment in project.get("environments").and_then(|e| e.as_array()).into_iter().flatten() {
                for application in environment.get("applications").and_then(|a| a.as_array()).into_iter().flatten() {
                    if let Ok(application) = serde_json::from_value::<Application>(application.clone()) {
                        applications.push(application);
                    }
                }
            }
        }
        Ok(applications)
    }

    /// Returns a deep-cloned snapshot of the cached application list,
    /// refreshing it first if the TTL has elapsed.
    pub async fn list_applications(&self) -> Vec<Application> {
        self.refresh_cache(false).await;
        let state = self.cache.lock().await;
        state.applications.clone()
    }

    pub async fn find_application_by_name(&self, app_name: &str) -> Option<Application> {
        if !self.enabled() {
            return None;
        }
        self.refresh_cache(false).await;
        let state = self.cache.lock().await;
        state.applications.iter().find(|a| a.app_name == app_name).cloned()
    }

    pub async fn update_application(
        &self,
        application_id: &str,
        labels: Option<&HashMap<String, String>>,
        networks: Option<&[crate::model::ApplicationNetwork]>,
    ) {
        if !self.enabled() {
            return;
        }
        let mut inner = json!({ "applicationId": application_id });
        if let Some(labels) = labels {
            inner["labelsSwarm"] = json!(labels);
        }
        if let Some(networks) = networks {
            inner["networkSwarm"] = json!(networks);
        }
        let body = json!({ "0": { "json": inner } });

        let url = format!("{}/api/trpc/application.update?batch=1", self.base_url);
        let result = self
            .http
            .post(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(15))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(json) => {
                    if let Err(err) = Self::unwrap_envelope(json, "application.update") {
                        error!(application_id, error = %err, "control-plane rejected application update");
                        return;
                    }
                    debug!(application_id, "control-plane application updated");
                    self.refresh_cache(true).await;
                }
                Err(err) => error!(application_id, error = %err, "could not parse control-plane response"),
            },
            Err(err) => error!(application_id, error = %err, "failed to call control-plane application.update"),
        }
    }

    pub async fn update_domain(&self, domain_id: &str, payload: &serde_json::Value) {
        if !self.enabled() {
            return;
        }
        let mut inner = json!({ "domainId": domain_id });
        if let Some(map) = payload.as_object() {
            for (key, value) in map {
                inner[key] = value.clone();
            }
        }
        let body = json!({ "0": { "json": inner } });

        let url = format!("{}/api/trpc/domain.update?batch=1", self.base_url);
        let result = self
            .http
            .post(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(15))
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(response) => match response.json::<serde_json::Value>().await {
                Ok(json) => {
                    if let Err(err) = Self::unwrap_envelope(json, "domain.update") {
                        error!(domain_id, error = %err, "control-plane rejected domain update");
                        return;
                    }
                    debug!(domain_id, "control-plane domain updated");
                    self.refresh_cache(true).await;
                }
                Err(err) => error!(domain_id, error = %err, "could not parse control-plane response"),
            },
            Err(err) => error!(domain_id, error = %err, "failed to call control-plane domain.update"),
        }
    }
}

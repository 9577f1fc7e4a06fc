//! Environment-variable configuration (§6).
//!
//! Env-only, no file layer — see DESIGN.md's Open Question resolution for why
//! this daemon doesn't carry the teacher's `AGENT_CONFIG_FILE` TOML override.

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct AutoswarmConfig {
    pub log_level: String,
    pub docker_host: String,
    pub traefik_network: String,
    pub reconcile_interval_secs: u64,
    pub dokploy_url: String,
    pub dokploy_api_key: Option<String>,
    pub dokploy_cache_ttl_secs: u64,
}

impl Default for AutoswarmConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            docker_host: "unix:///var/run/docker.sock".to_string(),
            traefik_network: "traefik-public".to_string(),
            reconcile_interval_secs: 60,
            dokploy_url: "http://dokploy:3000".to_string(),
            dokploy_api_key: None,
            dokploy_cache_ttl_secs: 30,
        }
    }
}

impl AutoswarmConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("AUTOSWARM_LOG_LEVEL")
                .unwrap_or(defaults.log_level)
                .to_uppercase(),
            docker_host: std::env::var("DOCKER_HOST").unwrap_or(defaults.docker_host),
            traefik_network: std::env::var("AUTOSWARM_TRAEFIK_NETWORK")
                .unwrap_or(defaults.traefik_network),
            reconcile_interval_secs: std::env::var("AUTOSWARM_RECONCILE_INTERVAL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reconcile_interval_secs),
            dokploy_url: std::env::var("AUTOSWARM_DOKPLOY_URL")
                .unwrap_or(defaults.dokploy_url)
                .trim_end_matches('/')
                .to_string(),
            dokploy_api_key: std::env::var("AUTOSWARM_DOKPLOY_API_KEY").ok(),
            dokploy_cache_ttl_secs: std::env::var("AUTOSWARM_DOKPLOY_CACHE_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.dokploy_cache_ttl_secs),
        }
    }

    /// `load()` is the entry point `main` calls; kept separate from
    /// `from_env()` so a future config-file layer (should one ever be
    /// warranted) has a single seam to extend.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconcile_interval_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "AUTOSWARM_RECONCILE_INTERVAL",
                value: 0,
            });
        }
        if self.dokploy_cache_ttl_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "AUTOSWARM_DOKPLOY_CACHE_TTL",
                value: 0,
            });
        }
        if self.dokploy_api_key.is_some() && self.dokploy_url.is_empty() {
            return Err(ConfigError::MissingWhenEnabled {
                field: "AUTOSWARM_DOKPLOY_URL",
            });
        }
        Ok(())
    }

    pub fn control_plane_enabled(&self) -> bool {
        self.dokploy_api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialise tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "AUTOSWARM_LOG_LEVEL",
            "DOCKER_HOST",
            "AUTOSWARM_TRAEFIK_NETWORK",
            "AUTOSWARM_RECONCILE_INTERVAL",
            "AUTOSWARM_DOKPLOY_URL",
            "AUTOSWARM_DOKPLOY_API_KEY",
            "AUTOSWARM_DOKPLOY_CACHE_TTL",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_spec_table() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = AutoswarmConfig::from_env();
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.docker_host, "unix:///var/run/docker.sock");
        assert_eq!(config.traefik_network, "traefik-public");
        assert_eq!(config.reconcile_interval_secs, 60);
        assert_eq!(config.dokploy_url, "http://dokploy:3000");
        assert!(config.dokploy_api_key.is_none());
        assert_eq!(config.dokploy_cache_ttl_secs, 30);
        assert!(!config.control_plane_enabled());
    }

    #[test]
    fn unparsable_numeric_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AUTOSWARM_RECONCILE_INTERVAL", "not-a-number");
        let config = AutoswarmConfig::from_env();
        assert_eq!(config.reconcile_interval_secs, 60);
        clear_env();
    }

    #[test]
    fn dokploy_url_trailing_slash_is_stripped() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AUTOSWARM_DOKPLOY_URL", "http://dokploy:3000/");
        let config = AutoswarmConfig::from_env();
        assert_eq!(config.dokploy_url, "http://dokploy:3000");
        clear_env();
    }

    #[test]
    fn api_key_enables_control_plane() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AUTOSWARM_DOKPLOY_API_KEY", "secret");
        let config = AutoswarmConfig::from_env();
        assert!(config.control_plane_enabled());
        clear_env();
    }

    #[test]
    fn validate_rejects_zero_reconcile_interval() {
        let mut config = AutoswarmConfig::default();
        config.reconcile_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_cache_ttl() {
        let mut config = AutoswarmConfig::default();
        config.dokploy_cache_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(AutoswarmConfig::default().validate().is_ok());
    }

    #[test]
    fn log_level_is_uppercased() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("AUTOSWARM_LOG_LEVEL", "debug");
        let config = AutoswarmConfig::from_env();
        assert_eq!(config.log_level, "DEBUG");
        clear_env();
    }
}

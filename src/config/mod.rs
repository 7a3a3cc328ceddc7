/// Configuration management for the tenant router

use crate::routing::RoutingCacheConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main tenant router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this instance, sent with discovery requests
    pub instance: InstanceConfig,
    /// Routing cache timing
    #[serde(default)]
    pub cache: CacheConfig,
    /// Static discovery routes
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub instance_id: String,
    /// Service the resolved descriptors should connect to
    pub service_id: String,
    /// Named port on that service
    pub port_name: String,
    /// Only accept descriptors from this release group
    pub release_group: Option<String>,
}

/// Routing cache timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time a resolution stays fresh, in seconds
    pub ttl_sec: u64,
    /// Background sweep interval in seconds
    pub refresh_interval_sec: u64,
    /// Entries expiring within this many seconds are refreshed by the sweep
    pub refresh_margin_sec: u64,
    /// Tenants resolved at startup
    pub warm_tenants: Vec<String>,
}

/// Static discovery routes, used by the bundled static provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Answer only requests from these instance ids (empty: answer everyone)
    pub allowed_instances: Vec<String>,
    pub routes: Vec<StaticRouteConfig>,
}

/// One tenant's route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRouteConfig {
    pub tenant: String,
    pub owner: String,
    /// `host:port` endpoints
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub ssl: bool,
    pub release_group: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_sec: 60,
            refresh_interval_sec: 10,
            refresh_margin_sec: 15,
            warm_tenants: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance: InstanceConfig {
                instance_id: "instance-1".to_string(),
                service_id: "backend".to_string(),
                port_name: "main".to_string(),
                release_group: None,
            },
            cache: CacheConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.instance_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "instance_id cannot be empty".to_string(),
            ));
        }

        if self.cache.ttl_sec == 0 {
            return Err(ConfigError::ValidationError(
                "ttl_sec must be greater than 0".to_string(),
            ));
        }

        if self.cache.refresh_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "refresh_interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.cache.refresh_margin_sec >= self.cache.ttl_sec {
            return Err(ConfigError::ValidationError(
                "refresh_margin_sec must be less than ttl_sec".to_string(),
            ));
        }

        for route in &self.discovery.routes {
            if route.tenant.trim().is_empty() || route.owner.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "discovery routes need a tenant and an owner".to_string(),
                ));
            }

            for endpoint in &route.endpoints {
                endpoint
                    .parse::<crate::core::HostPort>()
                    .map_err(ConfigError::ValidationError)?;
            }
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Routing cache settings derived from this configuration
    pub fn routing_cache_config(&self) -> Result<RoutingCacheConfig, ConfigError> {
        let config = RoutingCacheConfig::new(
            self.instance.instance_id.clone(),
            self.instance.service_id.clone(),
            self.instance.port_name.clone(),
            Duration::from_secs(self.cache.ttl_sec),
        )
        .map_err(ConfigError::ValidationError)?
        .with_refresh(
            Duration::from_secs(self.cache.refresh_interval_sec),
            Duration::from_secs(self.cache.refresh_margin_sec),
        );

        Ok(match &self.instance.release_group {
            Some(group) => config.with_release_group(group.clone()),
            None => config,
        })
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            cache: CacheConfig {
                warm_tenants: vec!["acme".to_string(), "globex".to_string()],
                ..Default::default()
            },
            discovery: DiscoveryConfig {
                allowed_instances: vec![],
                routes: vec![
                    StaticRouteConfig {
                        tenant: "acme".to_string(),
                        owner: "account-1".to_string(),
                        endpoints: vec![
                            "10.0.1.10:10000".to_string(),
                            "10.0.1.11:10000".to_string(),
                        ],
                        ssl: false,
                        release_group: None,
                    },
                    StaticRouteConfig {
                        tenant: "globex".to_string(),
                        owner: "account-1".to_string(),
                        endpoints: vec![
                            "10.0.1.10:10000".to_string(),
                            "10.0.1.11:10000".to_string(),
                        ],
                        ssl: false,
                        release_group: None,
                    },
                ],
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.cache.refresh_margin_sec = config.cache.ttl_sec;
        assert!(config.validate().is_err());

        config.cache.refresh_margin_sec = 5;
        assert!(config.validate().is_ok());

        config.instance.instance_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_route_endpoint() {
        let mut config = Config::default();
        config.discovery.routes.push(StaticRouteConfig {
            tenant: "acme".to_string(),
            owner: "account-1".to_string(),
            endpoints: vec!["10.0.1.10".to_string()],
            ssl: false,
            release_group: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let toml_str = r#"
            [instance]
            instance_id = "testInstance"
            service_id = "testService"
            port_name = "testPort"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.ttl_sec, 60);
        assert_eq!(config.logging.level, "info");

        let cache_config = config.routing_cache_config().unwrap();
        assert_eq!(cache_config.instance_id, "testInstance");
        assert_eq!(cache_config.refresh_interval, Duration::from_secs(10));
        assert!(cache_config.release_group.is_none());
    }

    #[test]
    fn test_config_file_operations() {
        let temp_file = NamedTempFile::new().unwrap();

        Config::create_example_config(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config.discovery.routes.len(), 2);
        assert_eq!(loaded_config.cache.warm_tenants, vec!["acme", "globex"]);
    }
}

//! Configuration management for Throttled.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ThrottledError};

/// Environment variable prefix, e.g. `THROTTLED_STORE__CACHE_SIZE=5000`.
pub const ENV_PREFIX: &str = "THROTTLED";

/// Main configuration for the Throttled service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottledConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on; there is no default
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

/// Limiter store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of keys held before the least recently used is evicted
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
        }
    }
}

fn default_cache_size() -> usize {
    100_000
}

impl ThrottledConfig {
    /// Load configuration from defaults, an optional YAML file and `THROTTLED_*` environment
    /// variables, in increasing order of precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        let config: ThrottledConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| ThrottledError::Config(e.to_string()))
    }

    /// Check the settings the service cannot start without.
    pub fn validate(&self) -> Result<()> {
        match self.server.port {
            None => return Err(ThrottledError::Config("port is required".to_string())),
            Some(0) => return Err(ThrottledError::Config("port must be non-zero".to_string())),
            Some(_) => {}
        }
        if self.store.cache_size == 0 {
            return Err(ThrottledError::Config(
                "cache size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The socket address to listen on, if a port is configured.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.server.port.map(|port| SocketAddr::new(self.server.host, port))
    }
}

//! Agent configuration
//!
//! Loaded from YAML; every field has a default so an empty file (or no file)
//! yields a working configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::FeatureFlags;
use crate::registry::RegistryConfig;
use crate::{Result, TcLensError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub ingress_enabled: bool,
    pub raw_packet_enabled: bool,
    pub classifier_priority: u16,
    pub classifier_handle: u16,
    pub raw_classifier_handle: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ingress_enabled: true,
            raw_packet_enabled: false,
            classifier_priority: 10,
            classifier_handle: 0,
            raw_classifier_handle: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Owner tag of every attachment, also the program-name module
    pub owner: String,
    pub network: NetworkConfig,
    pub sweep_interval_secs: u64,
    pub stats_interval_secs: u64,
    /// Interfaces whose names start with one of these are being removed
    /// lazily and are not counted as live by the sweep
    pub lazy_interface_prefixes: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            owner: "tclens".to_string(),
            network: NetworkConfig::default(),
            sweep_interval_secs: 30,
            stats_interval_secs: 10,
            lazy_interface_prefixes: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AgentConfig = if contents.trim().is_empty() {
            AgentConfig::default()
        } else {
            serde_yaml::from_str(contents)
                .map_err(|e| TcLensError::ConfigError(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(TcLensError::ConfigError("owner must not be empty".into()));
        }
        if self.network.classifier_priority == 0 {
            return Err(TcLensError::ConfigError(
                "network.classifier_priority must be greater than 0".into(),
            ));
        }
        if self.sweep_interval_secs == 0 || self.stats_interval_secs == 0 {
            return Err(TcLensError::ConfigError(
                "sweep_interval_secs and stats_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            ingress_enabled: self.network.ingress_enabled,
            raw_packet_enabled: self.network.raw_packet_enabled,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            module: self.owner.clone(),
            classifier_priority: self.network.classifier_priority,
            classifier_handle: self.network.classifier_handle,
            raw_classifier_handle: self.network.raw_classifier_handle,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    /// Lazy-deletion predicate for the staleness sweep
    pub fn is_lazy_interface(&self, name: &str) -> bool {
        self.lazy_interface_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

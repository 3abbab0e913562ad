//! Configuration for the cloud provider.
//!
//! Two layers: process settings read from `DATACRUNCH_*` environment
//! variables, and the cluster config (per node-group launch parameters)
//! loaded from base64 JSON or a file.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use dcas_api::{HttpClientConfig, PricingOption, DEFAULT_API_URL};
use dcas_startup_script::Preamble;
use k8s_openapi::api::core::v1::Taint;
use serde::Deserialize;
use thiserror::Error;

use crate::manager::ManagerConfig;
use crate::retry::BackoffPolicy;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("failed to parse cluster config: {0}")]
    ClusterConfigParse(String),

    #[error("cluster config has no node configs")]
    ClusterConfigEmpty,

    #[error("invalid node group spec {spec:?}: {reason}")]
    InvalidNodeGroupSpec { spec: String, reason: String },

    #[error("invalid node pool name {0:?}")]
    InvalidPoolName(String),

    #[error("no node config for node group {0}")]
    MissingNodeConfig(String),

    #[error("node group {0} is configured more than once")]
    DuplicateNodeGroup(String),
}

/// Provider process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// DataCrunch API base URL.
    pub api_url: String,

    /// OAuth2 client credentials.
    pub client_id: String,
    pub client_secret: String,

    /// Parsed cluster config.
    pub cluster_config: ClusterConfig,

    /// Global startup script, used by groups without their own.
    pub startup_script: Option<String>,

    /// Whether booted instances delete their own startup script.
    pub delete_scripts_after_boot: bool,

    /// Node-group spec strings (`<min>:<max>:<type>:<region>:<name>`).
    pub node_group_specs: Vec<String>,

    pub instance_cache_ttl: Duration,
    pub instance_type_cache_ttl: Duration,
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let client_id =
            var("DATACRUNCH_CLIENT_ID").ok_or(ConfigError::Missing("DATACRUNCH_CLIENT_ID"))?;
        let client_secret = var("DATACRUNCH_CLIENT_SECRET")
            .ok_or(ConfigError::Missing("DATACRUNCH_CLIENT_SECRET"))?;

        let api_url = var("DATACRUNCH_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let cluster_json = match (
            var("DATACRUNCH_CLUSTER_CONFIG"),
            var("DATACRUNCH_CLUSTER_CONFIG_FILE"),
        ) {
            (Some(encoded), _) => {
                let bytes = STANDARD.decode(encoded.trim()).map_err(|e| ConfigError::Invalid {
                    var: "DATACRUNCH_CLUSTER_CONFIG",
                    reason: e.to_string(),
                })?;
                String::from_utf8(bytes).map_err(|_| ConfigError::Invalid {
                    var: "DATACRUNCH_CLUSTER_CONFIG",
                    reason: "not UTF-8".to_string(),
                })?
            }
            (None, Some(path)) => read_file(&path)?,
            (None, None) => return Err(ConfigError::Missing("DATACRUNCH_CLUSTER_CONFIG")),
        };
        let cluster_config = ClusterConfig::from_json(&cluster_json)?;

        let startup_script = match (
            var("DATACRUNCH_STARTUP_SCRIPT"),
            var("DATACRUNCH_STARTUP_SCRIPT_FILE"),
        ) {
            (Some(script), _) => Some(script),
            (None, Some(path)) => Some(read_file(&path)?),
            (None, None) => None,
        };

        let delete_scripts_after_boot = match var("DATACRUNCH_DELETE_SCRIPTS_AFTER_BOOT") {
            Some(value) => parse_bool("DATACRUNCH_DELETE_SCRIPTS_AFTER_BOOT", &value)?,
            None => false,
        };

        let node_group_specs = var("DATACRUNCH_NODE_GROUPS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let secs = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            match var(key) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Duration::from_secs)
                    .map_err(|_| ConfigError::Invalid {
                        var: key,
                        reason: format!("expected seconds, got {value:?}"),
                    }),
                None => Ok(Duration::from_secs(default)),
            }
        };

        Ok(Self {
            api_url,
            client_id,
            client_secret,
            cluster_config,
            startup_script,
            delete_scripts_after_boot,
            node_group_specs,
            instance_cache_ttl: secs("DATACRUNCH_INSTANCE_CACHE_TTL_SECS", 30)?,
            instance_type_cache_ttl: secs("DATACRUNCH_INSTANCE_TYPE_CACHE_TTL_SECS", 3600)?,
            http_timeout: secs("DATACRUNCH_HTTP_TIMEOUT_SECS", 30)?,
        })
    }

    /// Settings for the HTTP transport.
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            base_url: self.api_url.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            timeout: self.http_timeout,
        }
    }

    /// Settings for the manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            cluster: self.cluster_config.clone(),
            global_script: self.startup_script.clone(),
            delete_scripts_after_boot: self.delete_scripts_after_boot,
            preamble: Preamble::new(&self.api_url, &self.client_id, &self.client_secret),
            instance_cache_ttl: self.instance_cache_ttl,
            instance_type_cache_ttl: self.instance_type_cache_ttl,
            backoff: BackoffPolicy::default(),
        }
    }
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(ConfigError::Invalid {
            var,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

// =============================================================================
// Cluster config
// =============================================================================

/// Per node-group launch parameters, keyed by pool name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub node_configs: BTreeMap<String, NodeConfig>,
}

impl ClusterConfig {
    /// Parse and check a cluster config document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ClusterConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ClusterConfigParse(e.to_string()))?;
        if config.is_empty() {
            return Err(ConfigError::ClusterConfigEmpty);
        }
        Ok(config)
    }

    pub fn is_empty(&self) -> bool {
        self.node_configs.is_empty()
    }

    pub fn node_config(&self, pool: &str) -> Option<&NodeConfig> {
        self.node_configs.get(pool)
    }
}

/// Launch parameters of one node group.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeConfig {
    /// OS image to boot.
    pub image_type: String,

    #[serde(default)]
    pub ssh_key_ids: Vec<String>,

    #[serde(default)]
    pub instance_option: InstancePreference,

    /// Boot volume size; the image default when unset.
    #[serde(default)]
    pub disk_size_gb: Option<u32>,

    /// GPU count advertised on template nodes instead of the catalog value.
    #[serde(default)]
    pub override_num_gpus: Option<u32>,

    #[serde(default)]
    pub pricing_option: Option<PricingOption>,

    /// Group-specific startup script, base64 encoded.
    #[serde(default)]
    pub startup_script_base64: Option<String>,

    #[serde(default)]
    pub taints: Vec<Taint>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Contract type of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contract {
    Spot,
    OnDemand,
}

impl Contract {
    pub fn is_spot(self) -> bool {
        matches!(self, Contract::Spot)
    }
}

/// Which contract new instances use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstancePreference {
    /// Spot first, on-demand when spot capacity is exhausted.
    PreferSpot,
    /// On-demand first, spot when on-demand capacity is exhausted.
    PreferOnDemand,
    SpotOnly,
    #[default]
    OnDemandOnly,
}

impl InstancePreference {
    /// First contract to try, and the fallback on insufficient capacity.
    pub fn contracts(self) -> (Contract, Option<Contract>) {
        match self {
            InstancePreference::PreferSpot => (Contract::Spot, Some(Contract::OnDemand)),
            InstancePreference::PreferOnDemand => (Contract::OnDemand, Some(Contract::Spot)),
            InstancePreference::SpotOnly => (Contract::Spot, None),
            InstancePreference::OnDemandOnly => (Contract::OnDemand, None),
        }
    }
}

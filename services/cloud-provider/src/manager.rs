//! The manager shared by all node groups.
//!
//! Owns the API handle, the cached inventory, script settings and the update
//! lock. Node groups call into it for everything that touches the cloud.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dcas_api::{
    ApiError, CloudApi, CreateInstanceRequest, Instance, InstanceStatus, InstanceType,
    NewStartupScript, OsVolume,
};
use dcas_startup_script::{assemble, resolve_script, Preamble};
use k8s_openapi::api::core::v1::Node;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::cache::CachedInventory;
use crate::config::{ClusterConfig, ConfigError, Contract, NodeConfig};
use crate::error::ProviderError;
use crate::node::{node_group_label, node_instance_id, node_name};
use crate::retry::{retry_transient, BackoffPolicy};
use crate::spec::NodeGroupSpec;

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub cluster: ClusterConfig,

    /// Script for groups without `startup_script_base64`.
    pub global_script: Option<String>,

    pub delete_scripts_after_boot: bool,

    /// Values injected into every startup script.
    pub preamble: Preamble,

    pub instance_cache_ttl: Duration,
    pub instance_type_cache_ttl: Duration,

    /// Retry policy for transient API errors.
    pub backoff: BackoffPolicy,
}

/// What to launch for one new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    /// Instance hostname, also the name the startup script is stored under.
    pub hostname: String,

    /// Assembled startup script, if the group has one.
    pub script: Option<String>,
}

/// Result of a batch of creates.
#[derive(Debug, Default)]
pub struct CreateOutcome {
    /// Instances the API accepted, in request order.
    pub created: Vec<Instance>,

    /// The terminal error that stopped the batch.
    pub failure: Option<ApiError>,
}

pub struct Manager {
    api: Arc<dyn CloudApi>,
    config: ManagerConfig,
    inventory: CachedInventory,
    group_regions: BTreeMap<String, String>,
    regions: BTreeSet<String>,
    update_lock: Arc<Mutex<()>>,
}

impl Manager {
    /// Create a manager for the given node groups.
    ///
    /// Every group needs a node config.
    pub fn new(
        api: Arc<dyn CloudApi>,
        config: ManagerConfig,
        specs: &[NodeGroupSpec],
    ) -> Result<Self, ConfigError> {
        if config.cluster.is_empty() {
            return Err(ConfigError::ClusterConfigEmpty);
        }
        if let Some(spec) = specs
            .iter()
            .find(|spec| config.cluster.node_config(&spec.id).is_none())
        {
            return Err(ConfigError::MissingNodeConfig(spec.id.clone()));
        }

        let group_regions: BTreeMap<String, String> = specs
            .iter()
            .map(|spec| (spec.id.clone(), spec.region.clone()))
            .collect();
        let regions = group_regions.values().cloned().collect();

        let inventory = CachedInventory::new(
            Arc::clone(&api),
            config.instance_cache_ttl,
            config.instance_type_cache_ttl,
            config.backoff.clone(),
        );

        Ok(Self {
            api,
            config,
            inventory,
            group_regions,
            regions,
            update_lock: Arc::new(Mutex::new(())),
        })
    }

    /// The lock serializing scale operations across all node groups.
    pub fn update_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.update_lock)
    }

    pub fn node_config(&self, group_id: &str) -> Option<&NodeConfig> {
        self.config.cluster.node_config(group_id)
    }

    pub fn inventory(&self) -> &CachedInventory {
        &self.inventory
    }

    pub async fn instance_types(&self) -> Result<Vec<InstanceType>, ApiError> {
        self.inventory.instance_types().await
    }

    /// Catalog entry for `name`.
    pub async fn instance_type(&self, name: &str) -> Result<InstanceType, ProviderError> {
        self.instance_types()
            .await?
            .into_iter()
            .find(|t| t.instance_type == name)
            .ok_or_else(|| ProviderError::UnknownInstanceType(name.to_string()))
    }

    /// Live instances of a node group.
    pub async fn all_servers(&self, spec: &NodeGroupSpec) -> Result<Vec<Instance>, ApiError> {
        Ok(self
            .group_instances(spec)
            .await?
            .into_iter()
            .filter(Instance::is_live)
            .collect())
    }

    /// Instances of a node group that still exist remotely, live or not.
    pub async fn group_instances(&self, spec: &NodeGroupSpec) -> Result<Vec<Instance>, ApiError> {
        Ok(self
            .inventory
            .instances(&spec.region)
            .await?
            .into_iter()
            .filter(|i| i.description == spec.id && i.status != InstanceStatus::Gone)
            .collect())
    }

    /// Build `count` launch plans for a group, each with its own hostname and
    /// assembled startup script.
    pub fn prepare_scripts(
        &self,
        group_id: &str,
        count: usize,
    ) -> Result<Vec<LaunchPlan>, ProviderError> {
        let node_config = self
            .node_config(group_id)
            .ok_or_else(|| ProviderError::UnknownGroup(group_id.to_string()))?;

        let user_script = resolve_script(
            node_config.startup_script_base64.as_deref(),
            self.config.global_script.as_deref(),
        )
        .map_err(|source| ProviderError::Script {
            group: group_id.to_string(),
            source,
        })?;

        Ok((0..count)
            .map(|_| {
                let hostname = hostname_for(group_id);
                let script = user_script.as_deref().map(|script| {
                    assemble(
                        script,
                        &self.config.preamble,
                        self.config.delete_scripts_after_boot,
                        &hostname,
                    )
                });
                LaunchPlan { hostname, script }
            })
            .collect())
    }

    /// Create one instance per plan.
    ///
    /// Stops at the first terminal error. Instances created before it are
    /// reported alongside the error.
    pub async fn create_servers(
        &self,
        spec: &NodeGroupSpec,
        plans: Vec<LaunchPlan>,
    ) -> Result<CreateOutcome, ProviderError> {
        let node_config = self
            .node_config(&spec.id)
            .ok_or_else(|| ProviderError::UnknownGroup(spec.id.clone()))?;

        let mut outcome = CreateOutcome::default();
        for plan in plans {
            let script_id = match &plan.script {
                Some(script) => {
                    let upload = NewStartupScript {
                        name: plan.hostname.clone(),
                        script: script.clone(),
                    };
                    match retry_transient(&self.config.backoff, "upload_script", || {
                        self.api.upload_script(&upload)
                    })
                    .await
                    {
                        Ok(id) => Some(id),
                        Err(err) => {
                            outcome.failure = Some(err);
                            break;
                        }
                    }
                }
                None => None,
            };

            match self
                .create_with_fallback(spec, node_config, &plan, script_id.as_deref())
                .await
            {
                Ok(instance) => {
                    info!(
                        group = %spec.id,
                        instance_id = %instance.id,
                        hostname = %instance.hostname,
                        spot = instance.is_spot,
                        "Instance created"
                    );
                    outcome.created.push(instance);
                }
                Err(err) => {
                    if let Some(script_id) = script_id {
                        self.delete_script_best_effort(&script_id).await;
                    }
                    outcome.failure = Some(err);
                    break;
                }
            }
        }

        if !outcome.created.is_empty() {
            self.inventory.invalidate_region(&spec.region).await;
        }
        Ok(outcome)
    }

    async fn create_with_fallback(
        &self,
        spec: &NodeGroupSpec,
        node_config: &NodeConfig,
        plan: &LaunchPlan,
        script_id: Option<&str>,
    ) -> Result<Instance, ApiError> {
        let (primary, fallback) = node_config.instance_option.contracts();

        match self.create_one(spec, node_config, plan, script_id, primary).await {
            Err(err) if err.is_insufficient_capacity() => match fallback {
                Some(fallback) => {
                    info!(
                        group = %spec.id,
                        hostname = %plan.hostname,
                        ?primary,
                        ?fallback,
                        "No capacity for preferred contract, falling back"
                    );
                    self.create_one(spec, node_config, plan, script_id, fallback)
                        .await
                }
                None => Err(err),
            },
            result => result,
        }
    }

    async fn create_one(
        &self,
        spec: &NodeGroupSpec,
        node_config: &NodeConfig,
        plan: &LaunchPlan,
        script_id: Option<&str>,
        contract: Contract,
    ) -> Result<Instance, ApiError> {
        let request = CreateInstanceRequest {
            instance_type: spec.instance_type.clone(),
            image: node_config.image_type.clone(),
            hostname: plan.hostname.clone(),
            description: spec.id.clone(),
            location_code: spec.region.clone(),
            ssh_key_ids: node_config.ssh_key_ids.clone(),
            startup_script_id: script_id.map(str::to_string),
            os_volume: node_config.disk_size_gb.map(|size| OsVolume {
                name: format!("{}-os", plan.hostname),
                size,
            }),
            is_spot: contract.is_spot(),
            // Spot instances have no contract pricing.
            pricing: match contract {
                Contract::Spot => None,
                Contract::OnDemand => node_config.pricing_option,
            },
        };

        let id = retry_transient(&self.config.backoff, "create_instance", || {
            self.api.create_instance(&request)
        })
        .await?;

        Ok(Instance {
            id,
            hostname: request.hostname,
            description: request.description,
            instance_type: request.instance_type,
            location: request.location_code,
            status: InstanceStatus::Provisioning,
            ip: None,
            is_spot: request.is_spot,
            created_at: Some(Utc::now()),
        })
    }

    async fn delete_script_best_effort(&self, script_id: &str) {
        if let Err(err) = self.api.delete_script(script_id).await {
            warn!(script_id, error = %err, "Failed to delete startup script of failed create");
        }
    }

    /// Delete an instance. An instance that no longer exists counts as
    /// deleted.
    pub async fn delete_server(&self, instance: &Instance) -> Result<(), ApiError> {
        let result = retry_transient(&self.config.backoff, "delete_instance", || {
            self.api.delete_instance(&instance.id)
        })
        .await;

        match result {
            Ok(()) => {
                info!(
                    instance_id = %instance.id,
                    hostname = %instance.hostname,
                    "Instance deleted"
                );
            }
            Err(err) if err.is_not_found() => {
                debug!(instance_id = %instance.id, "Instance already gone");
            }
            Err(err) => return Err(err),
        }

        self.inventory.invalidate_region(&instance.location).await;
        Ok(())
    }

    /// Find the instance backing a node.
    ///
    /// With a provider ID every known region is searched. Without one the
    /// node's group label picks the region and the node name is matched
    /// against instance hostnames. `None` means the node has not joined yet
    /// or its instance is gone.
    pub async fn server_for_node(&self, node: &Node) -> Result<Option<Instance>, ApiError> {
        if let Some(instance_id) = node_instance_id(node) {
            for region in &self.regions {
                let found = self
                    .inventory
                    .instances(region)
                    .await?
                    .into_iter()
                    .find(|i| i.id == instance_id && i.status != InstanceStatus::Gone);
                if found.is_some() {
                    return Ok(found);
                }
            }
            return Ok(None);
        }

        let Some(region) = node_group_label(node).and_then(|g| self.group_regions.get(g)) else {
            return Ok(None);
        };
        let name = node_name(node);
        if name.is_empty() {
            return Ok(None);
        }

        Ok(self
            .inventory
            .instances(region)
            .await?
            .into_iter()
            .find(|i| i.hostname == name && i.status != InstanceStatus::Gone))
    }

    /// Node-group id of a node: the instance description, else the node's
    /// group label.
    ///
    /// An instance with an empty description belongs to no group.
    pub async fn group_id_for_node(&self, node: &Node) -> Result<Option<String>, ApiError> {
        match self.server_for_node(node).await? {
            Some(instance) if instance.description.is_empty() => Ok(None),
            Some(instance) => Ok(Some(instance.description)),
            None => Ok(node_group_label(node).map(str::to_string)),
        }
    }

    /// Force the next listing of every region to hit the API.
    pub async fn invalidate_instances(&self) {
        self.inventory.invalidate_all_instances().await;
    }
}

/// Hostname for a new member of `group_id`: the id made hostname-safe plus a
/// lowercase ULID.
fn hostname_for(group_id: &str) -> String {
    let base: String = group_id
        .chars()
        .map(|c| match c {
            '.' | '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect();
    format!("{base}-{}", Ulid::new().to_string().to_lowercase())
}

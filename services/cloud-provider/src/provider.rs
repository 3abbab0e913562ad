//! The provider facade the autoscaler talks to.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dcas_api::{CloudApi, HttpClient};
use k8s_openapi::api::core::v1::Node;
use tracing::info;

use crate::config::{Config, ConfigError};
use crate::error::ProviderError;
use crate::limits::ResourceLimiter;
use crate::manager::{Manager, ManagerConfig};
use crate::node::{node_gpu_config, GpuConfig, GPU_LABEL};
use crate::node_group::NodeGroup;
use crate::spec::NodeGroupSpec;

/// Provider name reported to the autoscaler.
pub const PROVIDER_NAME: &str = "datacrunch";

/// Node groups by id. Built once and never modified.
#[derive(Debug, Default)]
pub struct NodeGroupRegistry {
    groups: BTreeMap<String, Arc<NodeGroup>>,
}

impl NodeGroupRegistry {
    pub fn get(&self, id: &str) -> Option<Arc<NodeGroup>> {
        self.groups.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<NodeGroup>> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// DataCrunch cloud provider.
pub struct DatacrunchProvider {
    manager: Arc<Manager>,
    registry: NodeGroupRegistry,
    resource_limiter: ResourceLimiter,
}

impl DatacrunchProvider {
    /// Build the provider from node-group spec strings.
    ///
    /// Each group starts with a target equal to its current live instance
    /// count.
    pub async fn build(
        api: Arc<dyn CloudApi>,
        config: ManagerConfig,
        node_group_specs: &[String],
    ) -> Result<Self, ProviderError> {
        if config.cluster.is_empty() {
            return Err(ConfigError::ClusterConfigEmpty.into());
        }

        let mut specs: Vec<NodeGroupSpec> = Vec::with_capacity(node_group_specs.len());
        for raw in node_group_specs {
            let spec: NodeGroupSpec = raw.parse()?;
            if specs.iter().any(|s| s.id == spec.id) {
                return Err(ConfigError::DuplicateNodeGroup(spec.id).into());
            }
            specs.push(spec);
        }

        let manager = Arc::new(Manager::new(api, config, &specs)?);

        let mut groups = BTreeMap::new();
        for spec in specs {
            let live = manager.all_servers(&spec).await?.len();
            info!(
                group = %spec.id,
                min = spec.min_size,
                max = spec.max_size,
                instance_type = %spec.instance_type,
                region = %spec.region,
                target = live,
                "Node group registered"
            );
            let group = NodeGroup::new(spec, Arc::clone(&manager), live);
            groups.insert(group.id().to_string(), Arc::new(group));
        }

        Ok(Self {
            manager,
            registry: NodeGroupRegistry { groups },
            resource_limiter: ResourceLimiter::default(),
        })
    }

    /// Replace the default unbounded resource limits.
    pub fn with_resource_limiter(mut self, resource_limiter: ResourceLimiter) -> Self {
        info!(limits = %resource_limiter, "Resource limits set");
        self.resource_limiter = resource_limiter;
        self
    }

    /// Build the provider against the real API.
    pub async fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api = Arc::new(HttpClient::new(config.http_client_config())?);
        Self::build(api, config.manager_config(), &config.node_group_specs).await
    }

    pub fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn node_groups(&self) -> Vec<Arc<NodeGroup>> {
        self.registry.iter().cloned().collect()
    }

    pub fn node_group(&self, id: &str) -> Option<Arc<NodeGroup>> {
        self.registry.get(id)
    }

    /// The group a node belongs to, if it is one of ours.
    pub async fn node_group_for_node(
        &self,
        node: &Node,
    ) -> Result<Option<Arc<NodeGroup>>, ProviderError> {
        Ok(self
            .manager
            .group_id_for_node(node)
            .await?
            .and_then(|id| self.registry.get(&id)))
    }

    /// Whether a node is backed by an existing instance.
    pub async fn has_instance(&self, node: &Node) -> Result<bool, ProviderError> {
        Ok(self.manager.server_for_node(node).await?.is_some())
    }

    /// Names of all instance types in the catalog.
    pub async fn available_machine_types(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .manager
            .instance_types()
            .await?
            .into_iter()
            .map(|t| t.instance_type)
            .collect())
    }

    pub fn resource_limiter(&self) -> &ResourceLimiter {
        &self.resource_limiter
    }

    pub fn gpu_label(&self) -> &'static str {
        GPU_LABEL
    }

    /// Instance types in the catalog that carry at least one GPU.
    pub async fn available_gpu_types(&self) -> Result<BTreeSet<String>, ProviderError> {
        Ok(self
            .manager
            .instance_types()
            .await?
            .into_iter()
            .filter(|t| t.gpu.number_of_gpus > 0)
            .map(|t| t.instance_type)
            .collect())
    }

    pub fn node_gpu_config(&self, node: &Node) -> Option<GpuConfig> {
        node_gpu_config(node)
    }

    /// Drop cached listings and resync every group's target with the live
    /// instance count.
    pub async fn refresh(&self) -> Result<(), ProviderError> {
        self.manager.invalidate_instances().await;
        for group in self.registry.iter() {
            group.reset_target_size(0).await?;
        }
        Ok(())
    }
}

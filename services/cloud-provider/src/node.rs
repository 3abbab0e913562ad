//! Attribution of Kubernetes nodes to instances and node groups.

use k8s_openapi::api::core::v1::Node;

use crate::template::GPU_RESOURCE;

/// Provider-ID scheme prefix: `datacrunch://<instance-id>`.
pub const PROVIDER_ID_PREFIX: &str = "datacrunch://";

/// Label carrying the node-group id on every provisioned node.
pub const NODE_GROUP_LABEL: &str = "datacrunch.io/node-group";

/// Label marking GPU nodes.
pub const GPU_LABEL: &str = "datacrunch.io/gpu-node";

/// Build the provider ID of an instance.
pub fn provider_id(instance_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{instance_id}")
}

/// Extract the instance id from a provider ID, if it uses our scheme.
pub fn instance_id_from_provider_id(provider_id: &str) -> Option<&str> {
    provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Instance id of a node, from its provider ID.
pub fn node_instance_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()?
        .provider_id
        .as_deref()
        .and_then(instance_id_from_provider_id)
}

/// Node-group id from the node's label.
pub fn node_group_label(node: &Node) -> Option<&str> {
    node.metadata
        .labels
        .as_ref()?
        .get(NODE_GROUP_LABEL)
        .map(String::as_str)
        .filter(|group| !group.is_empty())
}

pub fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// GPU attributes the autoscaler needs for a GPU node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuConfig {
    pub label: &'static str,
    /// Value of the GPU label; empty when only allocatable GPUs were seen.
    pub gpu_type: String,
    pub resource_name: &'static str,
}

/// GPU config of a node carrying the GPU label or allocatable GPUs.
pub fn node_gpu_config(node: &Node) -> Option<GpuConfig> {
    let config = |gpu_type: String| GpuConfig {
        label: GPU_LABEL,
        gpu_type,
        resource_name: GPU_RESOURCE,
    };

    if let Some(gpu_type) = node.metadata.labels.as_ref().and_then(|l| l.get(GPU_LABEL)) {
        return Some(config(gpu_type.clone()));
    }
    let allocatable = node.status.as_ref()?.allocatable.as_ref()?.get(GPU_RESOURCE)?;
    allocatable
        .0
        .trim()
        .parse::<u64>()
        .is_ok_and(|gpus| gpus > 0)
        .then(|| config(String::new()))
}

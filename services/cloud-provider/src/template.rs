//! Template nodes for scale-from-zero decisions.

use std::collections::BTreeMap;

use dcas_api::InstanceType;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeSpec, NodeStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::NodeConfig;
use crate::node::{provider_id, GPU_LABEL, NODE_GROUP_LABEL};
use crate::spec::NodeGroupSpec;

/// Pods schedulable on one node.
pub const DEFAULT_POD_LIMIT: u32 = 110;

/// Extended resource name of NVIDIA GPUs.
pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Describe a hypothetical new member of a node group.
pub fn template_node(
    spec: &NodeGroupSpec,
    node_config: &NodeConfig,
    instance_type: &InstanceType,
) -> Node {
    let name = format!("{}-template", spec.id);
    let gpus = node_config
        .override_num_gpus
        .unwrap_or(instance_type.gpu.number_of_gpus);

    let mut labels = node_config.labels.clone();
    labels.insert(NODE_GROUP_LABEL.to_string(), spec.id.clone());
    labels.insert(
        "node.kubernetes.io/instance-type".to_string(),
        spec.instance_type.clone(),
    );
    labels.insert("topology.kubernetes.io/region".to_string(), spec.region.clone());
    labels.insert("kubernetes.io/os".to_string(), "linux".to_string());
    labels.insert("kubernetes.io/hostname".to_string(), name.clone());
    if gpus > 0 {
        labels.insert(GPU_LABEL.to_string(), "true".to_string());
    }

    let mut capacity = BTreeMap::from([
        (
            "cpu".to_string(),
            Quantity(instance_type.cpu.number_of_cores.to_string()),
        ),
        (
            "memory".to_string(),
            Quantity(format!("{}Gi", instance_type.memory.size_in_gigabytes)),
        ),
        ("pods".to_string(), Quantity(DEFAULT_POD_LIMIT.to_string())),
    ]);
    if gpus > 0 {
        capacity.insert(GPU_RESOURCE.to_string(), Quantity(gpus.to_string()));
    }

    Node {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(provider_id(&name)),
            taints: (!node_config.taints.is_empty()).then(|| node_config.taints.clone()),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            allocatable: Some(capacity.clone()),
            capacity: Some(capacity),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

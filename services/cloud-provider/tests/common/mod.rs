//! Shared fixtures for provider integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dcas_api::{CpuSpec, GpuSpec, InstanceType, MemorySpec, MockCloudApi};
use dcas_cloud_provider::node::NODE_GROUP_LABEL;
use dcas_cloud_provider::retry::BackoffPolicy;
use dcas_cloud_provider::{ClusterConfig, DatacrunchProvider, ManagerConfig};
use dcas_startup_script::Preamble;
use k8s_openapi::api::core::v1::{Node, NodeSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub const CLUSTER_JSON: &str = r#"{
    "node_configs": {
        "gpu-pool": {
            "image_type": "ubuntu-22.04-cuda-12.0-docker",
            "ssh_key_ids": ["key-1"],
            "taints": [{"key": "nvidia.com/gpu", "value": "true", "effect": "NoSchedule"}],
            "labels": {"team": "ml"}
        },
        "cpu-pool": {
            "image_type": "ubuntu-22.04",
            "instance_option": "prefer_spot"
        }
    }
}"#;

pub fn manager_config() -> ManagerConfig {
    ManagerConfig {
        cluster: ClusterConfig::from_json(CLUSTER_JSON).unwrap(),
        global_script: Some("#!/bin/bash\nkubeadm join --config /etc/kubeadm.yaml\n".to_string()),
        delete_scripts_after_boot: true,
        preamble: Preamble::new("https://api.example.test/v1", "client-id", "client-secret"),
        instance_cache_ttl: Duration::from_secs(30),
        instance_type_cache_ttl: Duration::from_secs(3600),
        backoff: BackoffPolicy::immediate(3),
    }
}

pub async fn provider(api: &Arc<MockCloudApi>, specs: &[&str]) -> DatacrunchProvider {
    let specs: Vec<String> = specs.iter().map(|s| s.to_string()).collect();
    DatacrunchProvider::build(api.clone(), manager_config(), &specs)
        .await
        .unwrap()
}

pub fn catalog() -> Vec<InstanceType> {
    vec![
        InstanceType {
            instance_type: "1V100.6V".to_string(),
            description: "Tesla V100 16GB".to_string(),
            cpu: CpuSpec { number_of_cores: 6 },
            memory: MemorySpec {
                size_in_gigabytes: 23,
            },
            gpu: GpuSpec { number_of_gpus: 1 },
        },
        InstanceType {
            instance_type: "CPU.4V".to_string(),
            description: "4 vCPU".to_string(),
            cpu: CpuSpec { number_of_cores: 4 },
            memory: MemorySpec {
                size_in_gigabytes: 16,
            },
            gpu: GpuSpec::default(),
        },
    ]
}

/// A Kubernetes node with an optional provider ID and group label.
pub fn node(name: &str, provider_id: Option<&str>, group: Option<&str>) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: group.map(|g| BTreeMap::from([(NODE_GROUP_LABEL.to_string(), g.to_string())])),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        status: None,
    }
}

/// A joined node for an existing instance.
pub fn joined(instance_id: &str, hostname: &str) -> Node {
    node(hostname, Some(&format!("datacrunch://{instance_id}")), None)
}

//! Integration tests for node-group scaling against the mock cloud.

mod common;

use std::sync::Arc;

use common::{catalog, joined, node, provider};
use dcas_api::{ApiError, InstanceStatus, MockCloudApi};
use dcas_cloud_provider::node::GPU_LABEL;
use dcas_cloud_provider::{InstanceState, ProviderError};
use dcas_startup_script::{has_preamble, PREAMBLE_BEGIN};
use proptest::prelude::*;

#[tokio::test]
async fn test_increase_beyond_max_makes_no_calls() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:3:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let err = group.increase_size(4).await.unwrap_err();

    assert!(err.is_capacity_violation(), "{err}");
    assert_eq!(group.target_size(), 0);
    assert_eq!(api.create_calls(), 0);
    assert_eq!(api.upload_script_calls(), 0);
}

#[tokio::test]
async fn test_increase_rejects_non_positive_delta() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:3:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    assert!(matches!(
        group.increase_size(0).await,
        Err(ProviderError::InvalidDelta { .. })
    ));
    assert_eq!(api.create_calls(), 0);
}

#[tokio::test]
async fn test_increase_size() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group.increase_size(2).await.unwrap();

    assert_eq!(group.target_size(), 2);
    let instances = api.instances();
    assert_eq!(instances.len(), 2);
    for instance in &instances {
        assert_eq!(instance.description, "gpu-pool");
        assert_eq!(instance.location, "FIN-01");
        assert!(instance.hostname.starts_with("gpu-pool-"));
    }

    let members = group.nodes().await.unwrap();
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.state == InstanceState::Creating));
    assert!(members.iter().all(|m| m.provider_id.starts_with("datacrunch://")));
}

#[tokio::test]
async fn test_scripts_carry_preamble_and_unique_names() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group.increase_size(3).await.unwrap();

    let scripts = api.scripts();
    assert_eq!(scripts.len(), 3);
    for script in &scripts {
        assert!(script.script.starts_with("#!/bin/bash\n"));
        assert!(has_preamble(&script.script));
        assert_eq!(script.script.matches(PREAMBLE_BEGIN).count(), 1);
        assert!(script.script.contains("kubeadm join"));
        assert!(script.script.contains(&format!("'{}'", script.name)));
    }

    let mut names: Vec<_> = scripts.iter().map(|s| s.name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 3);

    let requests = api.created_requests();
    for (request, script) in requests.iter().zip(&scripts) {
        assert_eq!(request.hostname, script.name);
        assert_eq!(request.startup_script_id.as_deref(), Some(script.id.as_str()));
    }
}

#[tokio::test]
async fn test_partial_create_counts_accepted_instances() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:10:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    api.queue_create_results([
        Ok(()),
        Ok(()),
        Ok(()),
        Err(ApiError::RateLimited("slow down".to_string())),
        Ok(()),
        Err(ApiError::Rejected {
            status: 400,
            code: "invalid_request".to_string(),
            message: "image not available".to_string(),
        }),
    ]);

    let err = group.increase_size(5).await.unwrap_err();

    match err {
        ProviderError::PartialCreate {
            requested,
            created,
            source,
            ..
        } => {
            assert_eq!(requested, 5);
            assert_eq!(created, 4);
            assert!(matches!(source, ApiError::Rejected { status: 400, .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(group.target_size(), 4);
    assert_eq!(api.create_calls(), 6);
    assert_eq!(api.instances().len(), 4);
    // The script of the rejected create is cleaned up.
    assert_eq!(api.scripts().len(), 4);
}

#[tokio::test]
async fn test_concurrent_increases_respect_max() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:3:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let (first, second) = tokio::join!(group.increase_size(2), group.increase_size(2));

    assert!(first.is_ok() != second.is_ok());
    assert_eq!(group.target_size(), 2);
    assert_eq!(api.create_calls(), 2);
}

#[tokio::test]
async fn test_spot_preference_sets_contract() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:3:CPU.4V:FIN-01:cpu-pool"]).await;
    let group = provider.node_group("cpu-pool").unwrap();

    group.increase_size(1).await.unwrap();

    assert!(api.created_requests()[0].is_spot);
}

#[tokio::test]
async fn test_delete_node_without_instance_decrements_once() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-b");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();
    assert_eq!(group.target_size(), 2);

    group
        .delete_node(&node("gpu-pool-never-joined", None, Some("gpu-pool")))
        .await
        .unwrap();

    assert_eq!(group.target_size(), 1);
    assert_eq!(api.delete_calls(), 0);
    assert_eq!(api.instances().len(), 2);
}

#[tokio::test]
async fn test_delete_by_provider_id() {
    let api = Arc::new(MockCloudApi::new());
    let id = api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-b");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group.delete_nodes(&[joined(&id, "gpu-pool-a")]).await.unwrap();

    assert_eq!(group.target_size(), 1);
    assert_eq!(api.delete_calls(), 1);
    assert!(api.instances().iter().all(|i| i.id != id));
}

#[tokio::test]
async fn test_delete_by_hostname() {
    let api = Arc::new(MockCloudApi::new());
    let id = api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group
        .delete_node(&node("gpu-pool-a", None, Some("gpu-pool")))
        .await
        .unwrap();

    assert_eq!(group.target_size(), 0);
    assert!(api.instances().iter().all(|i| i.id != id));
}

#[tokio::test]
async fn test_delete_rejects_node_of_other_group() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let foreign = api.add_running("cpu-pool", "FIN-01", "cpu-pool-a");
    let provider = provider(
        &api,
        &["0:5:1V100.6V:FIN-01:gpu-pool", "0:5:CPU.4V:FIN-01:cpu-pool"],
    )
    .await;
    let group = provider.node_group("gpu-pool").unwrap();

    let err = group
        .delete_nodes(&[joined(&foreign, "cpu-pool-a")])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProviderError::NodeNotInGroup { ref actual, .. } if actual == "cpu-pool"
    ));
    assert_eq!(group.target_size(), 1);
    assert_eq!(api.delete_calls(), 0);
}

#[tokio::test]
async fn test_delete_rejects_untagged_instance() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let control_plane = api.add_running("", "FIN-01", "control-plane-0");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();
    let node = joined(&control_plane, "control-plane-0");
    assert!(provider.node_group_for_node(&node).await.unwrap().is_none());

    let err = group.delete_node(&node).await.unwrap_err();

    assert!(matches!(
        err,
        ProviderError::NodeNotInGroup { ref actual, .. } if actual.is_empty()
    ));
    assert_eq!(group.target_size(), 1);
    assert_eq!(api.delete_calls(), 0);
    assert!(api.instances().iter().any(|i| i.id == control_plane));
}

#[tokio::test]
async fn test_delete_rejects_labelled_node_of_untagged_instance() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    api.add_running("", "FIN-01", "gpu-pool-b");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let err = group
        .delete_node(&node("gpu-pool-b", None, Some("gpu-pool")))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::NodeNotInGroup { .. }));
    assert_eq!(api.delete_calls(), 0);
}

#[tokio::test]
async fn test_delete_below_min_is_rejected() {
    let api = Arc::new(MockCloudApi::new());
    let id = api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["1:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let err = group.delete_node(&joined(&id, "gpu-pool-a")).await.unwrap_err();

    assert!(err.is_capacity_violation());
    assert_eq!(group.target_size(), 1);
    assert_eq!(api.delete_calls(), 0);
}

#[tokio::test]
async fn test_partial_delete_keeps_confirmed_deletions() {
    let api = Arc::new(MockCloudApi::new());
    let a = api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-b");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();
    api.fail_delete(ApiError::Unauthorized("token revoked".to_string()));

    let err = group
        .delete_nodes(&[
            node("gpu-pool-ghost", None, Some("gpu-pool")),
            joined(&a, "gpu-pool-a"),
        ])
        .await
        .unwrap_err();

    match err {
        ProviderError::PartialDelete {
            requested, deleted, ..
        } => {
            assert_eq!(requested, 2);
            assert_eq!(deleted, 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(group.target_size(), 1);
    assert_eq!(api.instances().len(), 2);
}

#[tokio::test]
async fn test_delete_of_vanished_instance_succeeds() {
    let api = Arc::new(MockCloudApi::new());
    let id = api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();
    // Gone remotely, still in the cached listing.
    api.remove_instance(&id);

    group.delete_node(&joined(&id, "gpu-pool-a")).await.unwrap();

    assert_eq!(group.target_size(), 0);
    assert_eq!(api.delete_calls(), 1);
}

#[tokio::test]
async fn test_refresh_resets_target_to_live_count() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group.increase_size(2).await.unwrap();
    assert_eq!(group.target_size(), 3);

    let lost = api.instances()[1].id.clone();
    api.remove_instance(&lost);
    provider.refresh().await.unwrap();

    assert_eq!(group.target_size(), 2);
}

#[tokio::test]
async fn test_reset_target_size_with_seed() {
    let api = Arc::new(MockCloudApi::new());
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    group.reset_target_size(4).await.unwrap();
    assert_eq!(group.target_size(), 4);

    group.reset_target_size(0).await.unwrap();
    assert_eq!(group.target_size(), 0);
}

#[tokio::test]
async fn test_decrease_target_size() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();
    group.reset_target_size(3).await.unwrap();

    group.decrease_target_size(-1).await.unwrap();
    assert_eq!(group.target_size(), 2);

    assert!(matches!(
        group.decrease_target_size(-2).await,
        Err(ProviderError::DecreaseBelowLive { live: 1, .. })
    ));
    assert!(matches!(
        group.decrease_target_size(-5).await,
        Err(ProviderError::SizeOutOfBounds { .. })
    ));
    assert!(matches!(
        group.decrease_target_size(1).await,
        Err(ProviderError::InvalidDelta { .. })
    ));
    assert_eq!(group.target_size(), 2);
    assert_eq!(api.delete_calls(), 0);
}

#[tokio::test]
async fn test_nodes_report_lifecycle_state() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let mut broken = api.instances()[0].clone();
    broken.id = "inst-broken".to_string();
    broken.status = InstanceStatus::Error;
    api.add_instance(broken);
    let mut leaving = api.instances()[0].clone();
    leaving.id = "inst-leaving".to_string();
    leaving.status = InstanceStatus::Deleting;
    api.add_instance(leaving);
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let members = group.nodes().await.unwrap();
    assert_eq!(members.len(), 3);

    let broken = members
        .iter()
        .find(|m| m.provider_id == "datacrunch://inst-broken")
        .unwrap();
    assert_eq!(broken.state, InstanceState::Creating);
    assert!(broken.error.is_some());

    let leaving = members
        .iter()
        .find(|m| m.provider_id == "datacrunch://inst-leaving")
        .unwrap();
    assert_eq!(leaving.state, InstanceState::Deleting);

    assert_eq!(group.target_size(), 1);
}

#[tokio::test]
async fn test_template_node() {
    let api = Arc::new(MockCloudApi::new());
    api.set_instance_types(catalog());
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    let template = group.template_node().await.unwrap();

    let labels = template.metadata.labels.unwrap();
    assert_eq!(labels.get(GPU_LABEL).map(String::as_str), Some("true"));
    assert_eq!(labels.get("team").map(String::as_str), Some("ml"));
    let capacity = template.status.unwrap().capacity.unwrap();
    assert_eq!(capacity["nvidia.com/gpu"].0, "1");
    assert_eq!(capacity["cpu"].0, "6");
}

#[tokio::test]
async fn test_template_node_unknown_type() {
    let api = Arc::new(MockCloudApi::new());
    api.set_instance_types(catalog());
    let provider = provider(&api, &["0:5:8H100.80S:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    assert!(matches!(
        group.template_node().await,
        Err(ProviderError::UnknownInstanceType(_))
    ));
}

#[tokio::test]
async fn test_debug_summary() {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    let provider = provider(&api, &["0:5:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    assert_eq!(group.debug(), "gpu-pool (0:5) target=1");
    assert!(group.exist());
    assert!(!group.autoprovisioned());
}

#[derive(Debug, Clone)]
enum ScaleOp {
    /// Grow by `delta`; when set, the create after `fail_after` successes is
    /// rejected.
    Increase { delta: i64, fail_after: Option<usize> },
    /// Remove up to `members` joined nodes, plus one never-joined node when
    /// `ghost` is set; the first real delete fails when `fail` is set.
    Delete { members: usize, ghost: bool, fail: bool },
}

fn scale_op() -> impl Strategy<Value = ScaleOp> {
    prop_oneof![
        (1i64..5, proptest::option::of(0usize..4))
            .prop_map(|(delta, fail_after)| ScaleOp::Increase { delta, fail_after }),
        (0usize..4, any::<bool>(), any::<bool>())
            .prop_map(|(members, ghost, fail)| ScaleOp::Delete { members, ghost, fail }),
    ]
}

async fn run_scale_ops(ops: Vec<ScaleOp>) -> Result<(), TestCaseError> {
    let api = Arc::new(MockCloudApi::new());
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-a");
    api.add_running("gpu-pool", "FIN-01", "gpu-pool-b");
    let provider = provider(&api, &["1:6:1V100.6V:FIN-01:gpu-pool"]).await;
    let group = provider.node_group("gpu-pool").unwrap();

    for (step, op) in ops.into_iter().enumerate() {
        let target = group.target_size();
        let result = match op {
            ScaleOp::Increase { delta, fail_after } => {
                let fits = target as i64 + delta <= group.max_size() as i64;
                if let Some(ok) = fail_after.filter(|ok| fits && (*ok as i64) < delta) {
                    api.queue_create_results(
                        std::iter::repeat_with(|| Ok(()))
                            .take(ok)
                            .chain([Err(ApiError::QuotaExceeded("limit".to_string()))]),
                    );
                }
                group.increase_size(delta).await
            }
            ScaleOp::Delete { members, ghost, fail } => {
                let mut nodes: Vec<_> = api
                    .instances()
                    .into_iter()
                    .filter(|i| i.description == "gpu-pool" && i.is_live())
                    .take(members)
                    .map(|i| joined(&i.id, &i.hostname))
                    .collect();
                let real = nodes.len();
                if ghost {
                    nodes.push(node(&format!("gpu-pool-ghost-{step}"), None, Some("gpu-pool")));
                }
                let fits = target as i64 - nodes.len() as i64 >= group.min_size() as i64;
                if fail && real > 0 && fits {
                    api.fail_delete(ApiError::Unauthorized("revoked".to_string()));
                }
                group.delete_nodes(&nodes).await
            }
        };

        prop_assert!(group.target_size() <= group.max_size());
        if result.is_ok() {
            prop_assert!(
                group.min_size() <= group.target_size(),
                "step {}: target {} below min",
                step,
                group.target_size()
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_target_stays_within_bounds(ops in proptest::collection::vec(scale_op(), 1..12)) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(run_scale_ops(ops))?;
    }
}

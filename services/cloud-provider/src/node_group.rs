//! Node groups and their scaling state.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dcas_api::InstanceStatus;
use k8s_openapi::api::core::v1::Node;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::manager::Manager;
use crate::node::{node_group_label, node_name, provider_id};
use crate::spec::NodeGroupSpec;
use crate::template;

/// Lifecycle state of a group member as reported to the autoscaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Creating,
    Running,
    Deleting,
}

/// A member instance of a node group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInstance {
    pub provider_id: String,
    pub state: InstanceState,
    /// Set when the instance failed to come up.
    pub error: Option<String>,
}

/// A pool of instances of one type in one region.
///
/// `target_size` is only written while the manager's update lock is held;
/// reads never take the lock.
pub struct NodeGroup {
    spec: NodeGroupSpec,
    target_size: AtomicUsize,
    manager: Arc<Manager>,
    update_lock: Arc<Mutex<()>>,
}

impl NodeGroup {
    pub fn new(spec: NodeGroupSpec, manager: Arc<Manager>, target_size: usize) -> Self {
        let update_lock = manager.update_lock();
        Self {
            spec,
            target_size: AtomicUsize::new(target_size),
            manager,
            update_lock,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn min_size(&self) -> usize {
        self.spec.min_size
    }

    pub fn max_size(&self) -> usize {
        self.spec.max_size
    }

    pub fn spec(&self) -> &NodeGroupSpec {
        &self.spec
    }

    /// Current desired size.
    pub fn target_size(&self) -> usize {
        self.target_size.load(Ordering::Acquire)
    }

    /// Node groups are never created or removed at runtime.
    pub fn exist(&self) -> bool {
        true
    }

    pub fn autoprovisioned(&self) -> bool {
        false
    }

    fn set_target_size(&self, _guard: &MutexGuard<'_, ()>, size: usize) {
        self.target_size.store(size, Ordering::Release);
    }

    fn out_of_bounds(&self, requested: i64) -> ProviderError {
        ProviderError::SizeOutOfBounds {
            group: self.spec.id.clone(),
            requested,
            min: self.spec.min_size,
            max: self.spec.max_size,
        }
    }

    fn check_max(&self, requested: i64) -> Result<(), ProviderError> {
        if requested > self.spec.max_size as i64 {
            return Err(self.out_of_bounds(requested));
        }
        Ok(())
    }

    fn check_min(&self, requested: i64) -> Result<(), ProviderError> {
        if requested < self.spec.min_size as i64 {
            return Err(self.out_of_bounds(requested));
        }
        Ok(())
    }

    /// Add `delta` instances.
    ///
    /// The target grows by the number of instances the API accepted, even
    /// when a later create fails.
    pub async fn increase_size(&self, delta: i64) -> Result<(), ProviderError> {
        if delta <= 0 {
            return Err(ProviderError::InvalidDelta {
                group: self.spec.id.clone(),
                delta,
                expected: "positive",
            });
        }
        self.check_max((self.target_size() as i64).saturating_add(delta))?;

        let guard = self.update_lock.lock().await;
        let current = self.target_size();
        self.check_max((current as i64).saturating_add(delta))?;

        let requested = delta as usize;
        let plans = self.manager.prepare_scripts(&self.spec.id, requested)?;

        info!(group = %self.spec.id, delta, target = current, "Scaling up");
        let outcome = self.manager.create_servers(&self.spec, plans).await?;
        let created = outcome.created.len();
        self.set_target_size(&guard, current + created);

        match outcome.failure {
            None => {
                info!(group = %self.spec.id, target = current + created, "Scale up complete");
                Ok(())
            }
            Some(source) => {
                warn!(
                    group = %self.spec.id,
                    requested,
                    created,
                    error = %source,
                    "Scale up stopped early"
                );
                Err(ProviderError::PartialCreate {
                    group: self.spec.id.clone(),
                    requested,
                    created,
                    source,
                })
            }
        }
    }

    /// Delete the instances backing `nodes`.
    ///
    /// Every node must belong to this group and the group must stay at or
    /// above its minimum, otherwise nothing is deleted. A node whose instance
    /// cannot be found still counts as removed.
    pub async fn delete_nodes(&self, nodes: &[Node]) -> Result<(), ProviderError> {
        if nodes.is_empty() {
            return Ok(());
        }

        let guard = self.update_lock.lock().await;
        let current = self.target_size();
        self.check_min(current as i64 - nodes.len() as i64)?;

        let mut resolved = Vec::with_capacity(nodes.len());
        for node in nodes {
            let instance = self.manager.server_for_node(node).await?;
            // A resolved instance is attributed by its description alone; the
            // label only decides for nodes without one.
            let owner = match &instance {
                Some(instance) => Some(instance.description.as_str()),
                None => node_group_label(node),
            };
            if let Some(owner) = owner.filter(|owner| *owner != self.spec.id) {
                return Err(ProviderError::NodeNotInGroup {
                    node: node_name(node).to_string(),
                    group: self.spec.id.clone(),
                    actual: owner.to_string(),
                });
            }
            resolved.push((node_name(node), instance));
        }

        info!(group = %self.spec.id, count = nodes.len(), target = current, "Scaling down");
        let mut deleted = 0;
        for (name, instance) in resolved {
            match instance {
                None => {
                    debug!(
                        group = %self.spec.id,
                        node = name,
                        "No instance for node, treating as deleted"
                    );
                }
                Some(instance) => {
                    if let Err(source) = self.manager.delete_server(&instance).await {
                        self.set_target_size(&guard, current - deleted);
                        warn!(
                            group = %self.spec.id,
                            node = name,
                            deleted,
                            error = %source,
                            "Scale down stopped early"
                        );
                        return Err(ProviderError::PartialDelete {
                            group: self.spec.id.clone(),
                            requested: nodes.len(),
                            deleted,
                            source,
                        });
                    }
                }
            }
            deleted += 1;
        }

        self.set_target_size(&guard, current - deleted);
        info!(group = %self.spec.id, target = current - deleted, "Scale down complete");
        Ok(())
    }

    pub async fn delete_node(&self, node: &Node) -> Result<(), ProviderError> {
        self.delete_nodes(std::slice::from_ref(node)).await
    }

    /// Lower the target without deleting instances.
    ///
    /// Only capacity that never materialized can be given up: the new target
    /// may not drop below the live instance count.
    pub async fn decrease_target_size(&self, delta: i64) -> Result<(), ProviderError> {
        if delta >= 0 {
            return Err(ProviderError::InvalidDelta {
                group: self.spec.id.clone(),
                delta,
                expected: "negative",
            });
        }

        let guard = self.update_lock.lock().await;
        let current = self.target_size();
        let requested = (current as i64).saturating_add(delta);
        self.check_min(requested)?;

        let requested = requested as usize;
        let live = self.manager.all_servers(&self.spec).await?.len();
        if requested < live {
            return Err(ProviderError::DecreaseBelowLive {
                group: self.spec.id.clone(),
                requested,
                live,
            });
        }

        self.set_target_size(&guard, requested);
        info!(group = %self.spec.id, from = current, to = requested, "Target size decreased");
        Ok(())
    }

    /// Overwrite the target. A seed of 0 recomputes it from the live
    /// instance listing.
    pub async fn reset_target_size(&self, seed: usize) -> Result<(), ProviderError> {
        let guard = self.update_lock.lock().await;
        let size = if seed == 0 {
            self.manager.all_servers(&self.spec).await?.len()
        } else {
            seed
        };

        if size < self.spec.min_size || size > self.spec.max_size {
            warn!(
                group = %self.spec.id,
                size,
                min = self.spec.min_size,
                max = self.spec.max_size,
                "Target size outside node group bounds"
            );
        }

        let previous = self.target_size();
        self.set_target_size(&guard, size);
        if previous != size {
            debug!(group = %self.spec.id, from = previous, to = size, "Target size reset");
        }
        Ok(())
    }

    /// Instances currently in the group.
    pub async fn nodes(&self) -> Result<Vec<NodeInstance>, ProviderError> {
        Ok(self
            .manager
            .group_instances(&self.spec)
            .await?
            .into_iter()
            .map(|instance| {
                let (state, error) = match instance.status {
                    InstanceStatus::Provisioning => (InstanceState::Creating, None),
                    InstanceStatus::Deleting | InstanceStatus::Gone => {
                        (InstanceState::Deleting, None)
                    }
                    InstanceStatus::Error => (
                        InstanceState::Creating,
                        Some(format!("instance {} failed to provision", instance.id)),
                    ),
                    InstanceStatus::Running | InstanceStatus::Offline | InstanceStatus::Unknown => {
                        (InstanceState::Running, None)
                    }
                };
                NodeInstance {
                    provider_id: provider_id(&instance.id),
                    state,
                    error,
                }
            })
            .collect())
    }

    /// A node shaped like the next member of this group.
    pub async fn template_node(&self) -> Result<Node, ProviderError> {
        let node_config = self
            .manager
            .node_config(&self.spec.id)
            .ok_or_else(|| ProviderError::UnknownGroup(self.spec.id.clone()))?;
        let instance_type = self.manager.instance_type(&self.spec.instance_type).await?;
        Ok(template::template_node(&self.spec, node_config, &instance_type))
    }

    /// One-line summary.
    pub fn debug(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}) target={}",
            self.spec.id,
            self.spec.min_size,
            self.spec.max_size,
            self.target_size()
        )
    }
}

impl fmt::Debug for NodeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGroup")
            .field("spec", &self.spec)
            .field("target_size", &self.target_size())
            .finish()
    }
}

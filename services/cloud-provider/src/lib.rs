//! DataCrunch cloud provider core for the Kubernetes cluster autoscaler.
//!
//! Tracks desired vs. actual size of node groups (pools of one instance type
//! in one region), turns scale requests into DataCrunch API calls, and keeps
//! a time-bounded view of remote state.
//!
//! ## Architecture
//!
//! ```text
//! DatacrunchProvider            (facade, immutable node-group registry)
//! ├── NodeGroup(id)             (target size, scale operations)
//! └── Manager                   (shared by all groups)
//!     ├── CachedInventory       (instance-type catalog, per-region listings)
//!     ├── startup scripts       (source precedence + preamble assembly)
//!     └── update lock           (serializes scale operations across groups)
//! ```
//!
//! All scale operations of all groups run under one mutex: groups compete for
//! the same account quota and the same instance listings. Reads such as
//! [`NodeGroup::target_size`] never take it.
//!
//! ## Modules
//!
//! - `config`: environment and cluster configuration
//! - `spec`: node-group spec strings
//! - `cache`: TTL caches over the cloud API
//! - `retry`: bounded exponential backoff for transient API errors
//! - `node`: attribution of Kubernetes nodes to instances and groups
//! - `limits`: cluster-wide resource limits
//! - `manager`, `node_group`, `provider`: the scaling core
//! - `template`: template nodes for scale-from-zero

pub mod cache;
pub mod config;
pub mod error;
pub mod limits;
pub mod manager;
pub mod node;
pub mod node_group;
pub mod provider;
pub mod retry;
pub mod spec;
pub mod template;

pub use config::{ClusterConfig, Config, ConfigError, InstancePreference, NodeConfig};
pub use error::ProviderError;
pub use limits::ResourceLimiter;
pub use manager::{CreateOutcome, LaunchPlan, Manager, ManagerConfig};
pub use node::GpuConfig;
pub use node_group::{InstanceState, NodeGroup, NodeInstance};
pub use provider::{DatacrunchProvider, NodeGroupRegistry};
pub use spec::NodeGroupSpec;

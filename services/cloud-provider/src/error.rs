//! Provider error type.

use dcas_api::ApiError;
use dcas_startup_script::ScriptError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced by node groups, the manager and the provider facade.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The requested size is outside the group's bounds. Nothing was changed.
    #[error("node group {group}: size {requested} outside bounds [{min}, {max}]")]
    SizeOutOfBounds {
        group: String,
        requested: i64,
        min: usize,
        max: usize,
    },

    /// The delta has the wrong sign for the operation.
    #[error("node group {group}: delta {delta} must be {expected}")]
    InvalidDelta {
        group: String,
        delta: i64,
        expected: &'static str,
    },

    /// The node belongs to another group, or to none (empty `actual`).
    #[error("node {node} is not in node group {group} (owner: {actual:?})")]
    NodeNotInGroup {
        node: String,
        group: String,
        actual: String,
    },

    /// Some instances were created before a terminal failure.
    #[error("node group {group}: created {created} of {requested} instances: {source}")]
    PartialCreate {
        group: String,
        requested: usize,
        created: usize,
        #[source]
        source: ApiError,
    },

    /// Some nodes were deleted before a terminal failure.
    #[error("node group {group}: deleted {deleted} of {requested} nodes: {source}")]
    PartialDelete {
        group: String,
        requested: usize,
        deleted: usize,
        #[source]
        source: ApiError,
    },

    /// A target decrease would drop below the instances that already exist.
    #[error("node group {group}: target {requested} below {live} live instances")]
    DecreaseBelowLive {
        group: String,
        requested: usize,
        live: usize,
    },

    #[error("unknown node group {0}")]
    UnknownGroup(String),

    #[error("instance type {0} is not in the catalog")]
    UnknownInstanceType(String),

    #[error("node group {group}: {source}")]
    Script {
        group: String,
        #[source]
        source: ScriptError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ProviderError {
    /// Returns true if the request was rejected locally against the group's
    /// bounds or live size, before any API call.
    pub fn is_capacity_violation(&self) -> bool {
        matches!(
            self,
            ProviderError::SizeOutOfBounds { .. } | ProviderError::DecreaseBelowLive { .. }
        )
    }

    /// Returns true if the error wraps a retryable API failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Api(err)
            | ProviderError::PartialCreate { source: err, .. }
            | ProviderError::PartialDelete { source: err, .. } => err.is_transient(),
            _ => false,
        }
    }
}

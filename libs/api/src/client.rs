//! The cloud API seam consumed by the provider core.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{
    CreateInstanceRequest, Instance, InstanceFilter, InstanceType, NewStartupScript,
    StartupScript,
};

/// Operations the provider needs from the DataCrunch API.
///
/// Implementations perform exactly one remote request per call; retries are
/// the caller's concern.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List the instance-type catalog.
    async fn list_instance_types(&self) -> Result<Vec<InstanceType>, ApiError>;

    /// List instances matching the filter.
    async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<Instance>, ApiError>;

    /// Create an instance, returning its id once the request is accepted.
    async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<String, ApiError>;

    /// Delete an instance.
    async fn delete_instance(&self, instance_id: &str) -> Result<(), ApiError>;

    /// Store a startup script, returning its id.
    async fn upload_script(&self, script: &NewStartupScript) -> Result<String, ApiError>;

    /// Delete a stored startup script.
    async fn delete_script(&self, script_id: &str) -> Result<(), ApiError>;

    /// List stored startup scripts, optionally only those with the given name.
    async fn list_scripts(&self, name: Option<&str>) -> Result<Vec<StartupScript>, ApiError>;
}

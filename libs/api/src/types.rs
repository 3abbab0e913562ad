//! Wire types for the DataCrunch API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Instances
// =============================================================================

/// A remote virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub hostname: String,

    /// Free-form description. The autoscaler stores the owning node group
    /// id here so membership survives restarts.
    #[serde(default)]
    pub description: String,

    pub instance_type: String,

    /// Location code, e.g. `FIN-01`.
    pub location: String,

    pub status: InstanceStatus,

    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub is_spot: bool,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Returns true if the instance occupies capacity in its group.
    pub fn is_live(&self) -> bool {
        self.status.is_live()
    }
}

/// Instance lifecycle status.
///
/// The API reports a wider set of statuses than the autoscaler cares about;
/// they are folded into the lifecycle provisioning -> running -> deleting ->
/// gone, with `offline` and `error` kept distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[serde(alias = "ordered", alias = "new", alias = "validating")]
    Provisioning,
    Running,
    Offline,
    Deleting,
    #[serde(alias = "discontinued", alias = "notfound")]
    Gone,
    #[serde(alias = "no_capacity")]
    Error,
    #[serde(other)]
    Unknown,
}

impl InstanceStatus {
    /// Provisioning, running and offline instances count towards a group's
    /// size.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Running | Self::Offline)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Provisioning => write!(f, "provisioning"),
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Offline => write!(f, "offline"),
            InstanceStatus::Deleting => write!(f, "deleting"),
            InstanceStatus::Gone => write!(f, "gone"),
            InstanceStatus::Error => write!(f, "error"),
            InstanceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Server-side filter for instance listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceFilter {
    /// Only return instances in this location.
    pub location: Option<String>,
}

impl InstanceFilter {
    pub fn location(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
        }
    }

    pub fn matches(&self, instance: &Instance) -> bool {
        self.location
            .as_deref()
            .map(|location| instance.location == location)
            .unwrap_or(true)
    }
}

/// Body of a create-instance call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateInstanceRequest {
    pub instance_type: String,
    pub image: String,
    pub hostname: String,
    pub description: String,
    pub location_code: String,
    pub ssh_key_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_script_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_volume: Option<OsVolume>,
    pub is_spot: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingOption>,
}

/// Boot volume parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OsVolume {
    pub name: String,
    pub size: u32,
}

/// Contract pricing for a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingOption {
    FixedPrice,
    DynamicPrice,
}

// =============================================================================
// Instance types
// =============================================================================

/// An entry of the instance-type catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceType {
    pub instance_type: String,
    #[serde(default)]
    pub description: String,
    pub cpu: CpuSpec,
    pub memory: MemorySpec,
    #[serde(default)]
    pub gpu: GpuSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuSpec {
    pub number_of_cores: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySpec {
    pub size_in_gigabytes: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSpec {
    #[serde(default)]
    pub number_of_gpus: u32,
}

// =============================================================================
// Startup scripts
// =============================================================================

/// A stored startup script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupScript {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub script: String,
}

/// Body of an upload-script call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewStartupScript {
    pub name: String,
    pub script: String,
}

//! Node-group spec strings.
//!
//! A node group is declared as `<min>:<max>:<instance-type>:<region>:<name>`.
//! The string is split into at most five fields, so the name is whatever
//! follows the fourth colon.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Immutable descriptor of a node group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupSpec {
    /// Pool name, also the group id.
    pub id: String,
    pub min_size: usize,
    pub max_size: usize,
    pub instance_type: String,
    /// Location code, e.g. `FIN-01`.
    pub region: String,
}

impl FromStr for NodeGroupSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ConfigError::InvalidNodeGroupSpec {
            spec: s.to_string(),
            reason,
        };

        let fields: Vec<&str> = s.splitn(5, ':').collect();
        let [min, max, instance_type, region, name] = fields[..] else {
            return Err(invalid(format!(
                "expected <min>:<max>:<instance-type>:<region>:<name>, got {} fields",
                fields.len()
            )));
        };

        let min_size: usize = min
            .parse()
            .map_err(|_| invalid(format!("min size {min:?} is not a non-negative integer")))?;
        let max_size: usize = max
            .parse()
            .map_err(|_| invalid(format!("max size {max:?} is not a non-negative integer")))?;
        if min_size > max_size {
            return Err(invalid(format!(
                "min size {min_size} is greater than max size {max_size}"
            )));
        }
        if instance_type.is_empty() {
            return Err(invalid("instance type is empty".to_string()));
        }
        if region.is_empty() {
            return Err(invalid("region is empty".to_string()));
        }
        validate_pool_name(name)?;

        Ok(Self {
            id: name.to_string(),
            min_size,
            max_size,
            instance_type: instance_type.to_string(),
            region: region.to_string(),
        })
    }
}

impl fmt::Display for NodeGroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.min_size, self.max_size, self.instance_type, self.region, self.id
        )
    }
}

/// Check a pool name: one alphanumeric character, or alphanumeric at both
/// ends with alphanumerics, `-`, `.` or `_` in between.
pub fn validate_pool_name(name: &str) -> Result<(), ConfigError> {
    let bytes = name.as_bytes();
    let valid = match bytes {
        [] => false,
        [only] => only.is_ascii_alphanumeric(),
        [first, interior @ .., last] => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && interior
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
        }
    };

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidPoolName(name.to_string()))
    }
}

//! Script source precedence.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Errors decoding a configured startup script.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The per-group script is not valid base64.
    #[error("startup_script_base64 is not valid base64: {0}")]
    InvalidBase64(String),

    /// The decoded per-group script is not UTF-8.
    #[error("startup_script_base64 does not decode to UTF-8 text")]
    InvalidUtf8,
}

/// Pick the user script for a node group.
///
/// The per-group base64 script wins over the global script. Empty values
/// count as absent. `Ok(None)` means the instance boots on image defaults.
pub fn resolve_script(
    group_script_base64: Option<&str>,
    global_script: Option<&str>,
) -> Result<Option<String>, ScriptError> {
    if let Some(encoded) = group_script_base64.map(str::trim).filter(|s| !s.is_empty()) {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ScriptError::InvalidBase64(e.to_string()))?;
        let script = String::from_utf8(bytes).map_err(|_| ScriptError::InvalidUtf8)?;
        return Ok(Some(script));
    }

    Ok(global_script
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string))
}

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::UpdateError;

/// Metadata snapshot the Package Store writes when a downloaded package is
/// installed. Read-only from the agent's perspective; every field is
/// optional on the wire and unknown keys are tolerated so newer store
/// versions can extend the record without breaking older agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    /// Millisecond build timestamp of the binary that was live when this
    /// package was installed. Persisted as a string so it survives storage
    /// layers that mangle large integers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mandatory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_install: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl PackageMetadata {
    /// Install-time binary build timestamp as millis. Strips stray double
    /// quotes some storage layers wrap the value in before parsing.
    pub fn binary_modified_time_millis(&self) -> Result<Option<i64>> {
        let Some(raw) = self.binary_modified_time.as_deref() else {
            return Ok(None);
        };
        let cleaned = raw.replace('"', "");
        let millis = cleaned.parse::<i64>().map_err(|_| {
            UpdateError::data_integrity(format!(
                "package binary modified time is not an integer: {raw}"
            ))
        })?;
        Ok(Some(millis))
    }
}

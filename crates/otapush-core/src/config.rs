use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::UpdateError;

/// Construction-time agent configuration. Binary introspection values
/// (`app_version`, `binary_modified_time`) are injected explicitly instead
/// of being read from process-wide state, so independent agents can carry
/// different views in one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub deployment_key: String,
    /// Version string of the host binary, compared for byte equality.
    pub app_version: String,
    /// Build timestamp of the host binary in unix millis, injected at
    /// build time.
    pub binary_modified_time: i64,
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub debug_mode: bool,
}

impl AgentConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse agent config")?;
        config.validate()?;
        Ok(config)
    }

    /// The agent cannot safely run with an unusable identity: an empty app
    /// version breaks every latest-package comparison, and an empty public
    /// key would silently disable whatever verification the host wired up.
    pub fn validate(&self) -> Result<()> {
        if self.app_version.trim().is_empty() {
            return Err(UpdateError::configuration("app version must not be empty").into());
        }
        if let Some(key) = &self.public_key {
            if key.trim().is_empty() {
                return Err(
                    UpdateError::configuration("specified public key is empty").into(),
                );
            }
        }
        Ok(())
    }
}

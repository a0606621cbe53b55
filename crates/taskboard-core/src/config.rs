//! Board configuration.
//!
//! Every field has a default, so an empty JSON object (or none at all) is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BoardConfig {
    /// Prefix of the storage key holding a workspace's record
    pub storage_prefix: String,

    /// Prefix of the broadcast channel name for a workspace
    pub channel_prefix: String,

    /// Query parameter carrying the workspace id
    pub workspace_param: String,

    /// Longest share-link token accepted, in characters
    pub link_cap: usize,

    /// Poll period for the degraded sync mode
    pub poll_interval_ms: u64,

    /// How many snapshots undo can step back through
    pub history_depth: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "taskboard:".to_string(),
            channel_prefix: "taskboard-sync:".to_string(),
            workspace_param: "ws".to_string(),
            link_cap: 14_000,
            poll_interval_ms: 3_000,
            history_depth: 10,
        }
    }
}

impl BoardConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_param.is_empty() {
            return Err(ConfigError::Invalid("workspaceParam must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("pollIntervalMs must be positive".into()));
        }
        Ok(())
    }
}

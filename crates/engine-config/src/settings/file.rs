use crate::settings::error::SettingsError;
use serde::Deserialize;
use std::{fs, path::Path};

/// Raw settings document. Every field is optional; the validator fills in
/// defaults and rejects bad values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub rowset_size: Option<usize>,
    pub input_block_size: Option<usize>,
    pub input_poll_interval_ms: Option<u64>,
    pub state_dir: Option<String>,
    pub replay_dir: Option<String>,
    #[serde(default)]
    pub cluster: ClusterSettingsFile,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterSettingsFile {
    pub heartbeat_interval_ms: Option<u64>,
    pub max_missed_heartbeats: Option<u32>,
    pub rpc_timeout_ms: Option<u64>,
    pub start_attempts: Option<usize>,
    pub start_backoff_ms: Option<u64>,
}

impl SettingsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

use crate::settings::{
    error::SettingsError,
    file::SettingsFile,
    validated::{ClusterSettings, EngineSettings, EngineSettingsBuilder},
};
use engine_core::retry::RetryPolicy;
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};

const LARGE_ROWSET_SIZE: usize = 1_000_000;

/// Values given on the command line; they win over the settings file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub rowset_size: Option<usize>,
    pub state_dir: Option<PathBuf>,
    pub replay_dir: Option<PathBuf>,
    pub no_journal: bool,
}

/// Turns a raw settings document plus overrides into [`EngineSettings`].
pub struct SettingsValidator<'a> {
    file: &'a SettingsFile,
    overrides: &'a SettingsOverrides,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(file: &'a SettingsFile, overrides: &'a SettingsOverrides) -> Self {
        Self { file, overrides }
    }

    pub fn validate(&self) -> Result<EngineSettings, SettingsError> {
        let mut builder = EngineSettingsBuilder::new();
        let mut errors: Vec<String> = Vec::new();

        self.validate_rowset_size(&mut builder, &mut errors);
        self.validate_input_policy(&mut builder, &mut errors);
        self.validate_dirs(&mut builder);
        self.validate_cluster(&mut builder, &mut errors);

        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        let settings = builder.build();
        info!(
            rowset_size = settings.rowset_size,
            input_block_size = settings.input_block_size,
            journal = settings.state_dir.is_some(),
            replay = settings.is_replay(),
            "Engine settings validated"
        );
        Ok(settings)
    }

    fn validate_rowset_size(&self, builder: &mut EngineSettingsBuilder, errors: &mut Vec<String>) {
        let Some(size) = self.overrides.rowset_size.or(self.file.rowset_size) else {
            return;
        };
        if size == 0 {
            errors.push("rowset_size must be at least 1".to_string());
            return;
        }
        if size > LARGE_ROWSET_SIZE {
            warn!("RowSet size {size} is very large, may cause memory issues");
        }
        builder.rowset_size = Some(size);
    }

    fn validate_input_policy(&self, builder: &mut EngineSettingsBuilder, errors: &mut Vec<String>) {
        if let Some(block) = self.file.input_block_size {
            if block == 0 {
                errors.push("input_block_size must be at least 1".to_string());
            } else {
                builder.input_block_size = Some(block);
            }
        }
        if let Some(ms) = self.file.input_poll_interval_ms {
            if ms == 0 {
                errors.push("input_poll_interval_ms must be positive".to_string());
            } else {
                builder.input_poll_interval = Some(Duration::from_millis(ms));
            }
        }
    }

    fn validate_dirs(&self, builder: &mut EngineSettingsBuilder) {
        builder.replay_dir = self
            .overrides
            .replay_dir
            .clone()
            .or_else(|| self.file.replay_dir.as_ref().map(PathBuf::from));

        if self.overrides.no_journal {
            return;
        }
        builder.state_dir = self
            .overrides
            .state_dir
            .clone()
            .or_else(|| self.file.state_dir.as_ref().map(PathBuf::from))
            .or_else(|| match dirs::home_dir() {
                Some(home) => Some(home.join(".rowflow/state")),
                None => {
                    warn!("Could not determine home directory, run journal disabled");
                    None
                }
            });
    }

    fn validate_cluster(&self, builder: &mut EngineSettingsBuilder, errors: &mut Vec<String>) {
        let raw = &self.file.cluster;
        let mut cluster = ClusterSettings::default();

        if let Some(ms) = raw.heartbeat_interval_ms {
            if ms == 0 {
                errors.push("cluster.heartbeat_interval_ms must be positive".to_string());
            }
            cluster.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(n) = raw.max_missed_heartbeats {
            if n == 0 {
                errors.push("cluster.max_missed_heartbeats must be at least 1".to_string());
            }
            cluster.max_missed_heartbeats = n;
        }
        if let Some(ms) = raw.rpc_timeout_ms {
            if ms == 0 {
                errors.push("cluster.rpc_timeout_ms must be positive".to_string());
            }
            cluster.rpc_timeout = Duration::from_millis(ms);
        }
        if raw.start_attempts.is_some() || raw.start_backoff_ms.is_some() {
            let defaults = RetryPolicy::default();
            let backoff = raw
                .start_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay);
            cluster.start_retry = RetryPolicy::new(
                raw.start_attempts.unwrap_or(defaults.max_attempts),
                backoff,
                defaults.max_delay.max(backoff),
            );
        }
        if cluster.rpc_timeout > cluster.heartbeat_interval * 10 {
            warn!(
                rpc_timeout = ?cluster.rpc_timeout,
                heartbeat = ?cluster.heartbeat_interval,
                "RPC timeout is much longer than the heartbeat interval"
            );
        }

        builder.cluster = Some(cluster);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{file::ClusterSettingsFile, validated::DEFAULT_ROWSET_SIZE};

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let overrides = SettingsOverrides {
            no_journal: true,
            ..Default::default()
        };
        let settings = SettingsValidator::new(&SettingsFile::default(), &overrides)
            .validate()
            .unwrap();
        assert_eq!(settings.rowset_size, DEFAULT_ROWSET_SIZE);
        assert_eq!(settings.input_block_size, 500);
        assert!(settings.state_dir.is_none());
        assert!(!settings.is_replay());
    }

    #[test]
    fn overrides_win_over_file() {
        let file = SettingsFile {
            rowset_size: Some(50),
            replay_dir: Some("/from/file".into()),
            ..Default::default()
        };
        let overrides = SettingsOverrides {
            rowset_size: Some(7),
            state_dir: Some("/tmp/state".into()),
            ..Default::default()
        };
        let settings = SettingsValidator::new(&file, &overrides).validate().unwrap();
        assert_eq!(settings.rowset_size, 7);
        assert_eq!(settings.state_dir, Some(PathBuf::from("/tmp/state")));
        assert_eq!(settings.replay_dir, Some(PathBuf::from("/from/file")));
    }

    #[test]
    fn collects_every_problem() {
        let file = SettingsFile {
            rowset_size: Some(0),
            input_block_size: Some(0),
            cluster: ClusterSettingsFile {
                max_missed_heartbeats: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = SettingsOverrides::default();
        match SettingsValidator::new(&file, &overrides).validate() {
            Err(SettingsError::ValidationFailed(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn builds_start_retry_policy() {
        let file = SettingsFile {
            cluster: ClusterSettingsFile {
                start_attempts: Some(5),
                start_backoff_ms: Some(10),
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = SettingsOverrides {
            no_journal: true,
            ..Default::default()
        };
        let settings = SettingsValidator::new(&file, &overrides).validate().unwrap();
        assert_eq!(settings.cluster.start_retry.max_attempts, 5);
        assert_eq!(
            settings.cluster.start_retry.base_delay,
            Duration::from_millis(10)
        );
    }
}

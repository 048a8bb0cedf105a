use engine_core::retry::RetryPolicy;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_ROWSET_SIZE: usize = 10_000;
pub const DEFAULT_INPUT_BLOCK_SIZE: usize = 500;
pub const DEFAULT_INPUT_POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_MISSED_HEARTBEATS: u32 = 3;
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Immutable, validated configuration of the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Capacity of every RowSet
    pub rowset_size: usize,
    /// Rows read from one input before a unit moves on to the next input
    pub input_block_size: usize,
    /// How long a unit waits on an empty input before trying the others
    pub input_poll_interval: Duration,
    /// Directory of the run journal; `None` disables journaling
    pub state_dir: Option<PathBuf>,
    /// Directory holding a prior run's line logs; `None` processes everything
    pub replay_dir: Option<PathBuf>,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub heartbeat_interval: Duration,
    /// Consecutive failed status polls before a worker is declared stale
    pub max_missed_heartbeats: u32,
    pub rpc_timeout: Duration,
    pub start_retry: RetryPolicy,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_missed_heartbeats: DEFAULT_MAX_MISSED_HEARTBEATS,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            start_retry: RetryPolicy::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_builder(EngineSettingsBuilder::default())
    }
}

impl EngineSettings {
    pub fn from_builder(builder: EngineSettingsBuilder) -> Self {
        Self {
            rowset_size: builder.rowset_size.unwrap_or(DEFAULT_ROWSET_SIZE),
            input_block_size: builder
                .input_block_size
                .unwrap_or(DEFAULT_INPUT_BLOCK_SIZE),
            input_poll_interval: builder
                .input_poll_interval
                .unwrap_or(DEFAULT_INPUT_POLL_INTERVAL),
            state_dir: builder.state_dir,
            replay_dir: builder.replay_dir,
            cluster: builder.cluster.unwrap_or_default(),
        }
    }

    pub fn rowset_size(&self) -> usize {
        self.rowset_size
    }

    pub fn input_block_size(&self) -> usize {
        self.input_block_size
    }

    pub fn input_poll_interval(&self) -> Duration {
        self.input_poll_interval
    }

    pub fn is_replay(&self) -> bool {
        self.replay_dir.is_some()
    }
}

/// Collects settings before validation. Unset fields take the defaults above.
#[derive(Debug, Clone, Default)]
pub struct EngineSettingsBuilder {
    pub rowset_size: Option<usize>,
    pub input_block_size: Option<usize>,
    pub input_poll_interval: Option<Duration>,
    pub state_dir: Option<PathBuf>,
    pub replay_dir: Option<PathBuf>,
    pub cluster: Option<ClusterSettings>,
}

impl EngineSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rowset_size(mut self, size: usize) -> Self {
        self.rowset_size = Some(size);
        self
    }

    pub fn input_block_size(mut self, size: usize) -> Self {
        self.input_block_size = Some(size);
        self
    }

    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn replay_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.replay_dir = Some(dir.into());
        self
    }

    pub fn cluster(mut self, cluster: ClusterSettings) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn build(self) -> EngineSettings {
        EngineSettings::from_builder(self)
    }
}

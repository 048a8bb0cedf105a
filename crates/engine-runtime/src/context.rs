use crate::error::EngineError;
use engine_config::settings::validated::EngineSettings;
use engine_core::{
    playlist::{PlayAll, Playlist, ReplayPlaylist},
    state::{StateStore, sled_store::SledStateStore},
};
use engine_processing::registry::StepRegistry;
use std::sync::Arc;
use tracing::info;

/// Process-wide collaborators handed to every run. Built once, cloned cheaply.
#[derive(Clone)]
pub struct EngineContext {
    pub registry: Arc<StepRegistry>,
    pub settings: Arc<EngineSettings>,
    pub playlist: Arc<dyn Playlist>,
    pub journal: Option<Arc<dyn StateStore>>,
}

impl EngineContext {
    /// Built-in steps, a playlist matching `replay_dir`, no journal.
    pub fn new(settings: EngineSettings) -> Self {
        let playlist: Arc<dyn Playlist> = match &settings.replay_dir {
            Some(dir) => Arc::new(ReplayPlaylist::new(dir)),
            None => Arc::new(PlayAll),
        };
        Self {
            registry: Arc::new(StepRegistry::with_builtins()),
            settings: Arc::new(settings),
            playlist,
            journal: None,
        }
    }

    /// Opens the sled journal under `state_dir`, if one is configured.
    pub fn open_journal(mut self) -> Result<Self, EngineError> {
        if let Some(dir) = &self.settings.state_dir {
            info!(dir = %dir.display(), "Opening run journal");
            self.journal = Some(Arc::new(SledStateStore::open(dir)?));
        }
        Ok(self)
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_playlist(mut self, playlist: Arc<dyn Playlist>) -> Self {
        self.playlist = playlist;
        self
    }

    pub fn with_journal(mut self, journal: Arc<dyn StateStore>) -> Self {
        self.journal = Some(journal);
        self
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

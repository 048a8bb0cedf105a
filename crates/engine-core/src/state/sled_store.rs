use crate::{
    error::StateError,
    state::{StateStore, models::JournalEntry},
};
use async_trait::async_trait;
use std::path::Path;

pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Journal keys sort by run, then by a monotonic sequence number.
    #[inline]
    fn wal_key(run_id: &str, seq: u64) -> String {
        format!("wal:{run_id}:{seq:020}")
    }

    #[inline]
    fn run_key(seq: u64, run_id: &str) -> String {
        format!("run:{seq:020}:{run_id}")
    }
}

#[async_trait]
impl StateStore for SledStateStore {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError> {
        let seq = self.db.generate_id()?;
        let value = bincode::serialize(entry)?;

        if matches!(entry, JournalEntry::RunStart { .. }) {
            self.db
                .insert(Self::run_key(seq, entry.run_id()), entry.run_id().as_bytes())?;
        }
        self.db.insert(Self::wal_key(entry.run_id(), seq), value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn entries(&self, run_id: &str) -> Result<Vec<JournalEntry>, StateError> {
        let prefix = format!("wal:{run_id}:");
        let mut entries = Vec::new();

        for item in self.db.scan_prefix(prefix) {
            let (_key, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }

        Ok(entries)
    }

    async fn runs(&self) -> Result<Vec<String>, StateError> {
        let mut runs = Vec::new();
        for item in self.db.scan_prefix("run:") {
            let (_key, value) = item?;
            runs.push(String::from_utf8_lossy(&value).into_owned());
        }
        Ok(runs)
    }
}

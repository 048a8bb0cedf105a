use crate::{error::StateError, state::models::JournalEntry};
use async_trait::async_trait;

pub mod models;
pub mod sled_store;

/// Append-only journal of run life-cycle events.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn append(&self, entry: &JournalEntry) -> Result<(), StateError>;

    /// Entries of one run in append order.
    async fn entries(&self, run_id: &str) -> Result<Vec<JournalEntry>, StateError>;

    /// Ids of every run that has journal entries, oldest first.
    async fn runs(&self) -> Result<Vec<String>, StateError>;
}

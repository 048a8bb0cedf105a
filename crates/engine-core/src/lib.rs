pub mod error;
pub mod history;
pub mod metrics;
pub mod partition;
pub mod playlist;
pub mod retry;
pub mod rowset;
pub mod state;

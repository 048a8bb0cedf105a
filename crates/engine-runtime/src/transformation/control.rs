use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The run-wide flags shared by every unit of one run.
///
/// Stopping is cooperative and observed once per loop iteration. Aborting
/// also wakes every unit blocked inside a RowSet. Abort implies stop.
#[derive(Debug, Clone)]
pub struct RunControl {
    abort: CancellationToken,
    stop: CancellationToken,
}

impl RunControl {
    pub fn new() -> Self {
        let abort = CancellationToken::new();
        let stop = abort.child_token();
        Self { abort, stop }
    }

    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("Stop requested");
            self.stop.cancel();
        }
    }

    pub fn abort(&self) {
        if !self.abort.is_cancelled() {
            warn!("Abort requested");
            self.abort.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Token handed to every RowSet of the run.
    pub fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

use engine_runtime::transformation::control::RunControl;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::signal;
use tracing::{error, info, warn};

/// Turns SIGINT/SIGTERM into the run's stop request. The first signal asks
/// for a safe stop; a second one aborts.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    control: RunControl,
    signals: Arc<AtomicUsize>,
}

impl ShutdownCoordinator {
    pub fn new(control: RunControl) -> Self {
        Self {
            control,
            signals: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn register_handlers(&self) {
        let control = self.control.clone();
        let signals = self.signals.clone();

        tokio::spawn(async move {
            loop {
                let Some(name) = next_signal().await else {
                    return;
                };

                match signals.fetch_add(1, Ordering::SeqCst) {
                    0 => {
                        info!("Received {name}, stopping after in-flight rows (signal again to abort)");
                        control.stop();
                    }
                    _ => {
                        warn!("Received {name} again, aborting");
                        control.abort();
                        return;
                    }
                }
            }
        });
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.signals.load(Ordering::SeqCst) > 0
    }
}

/// Waits for the next SIGINT or SIGTERM. `None` when no handler could be installed.
async fn next_signal() -> Option<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                return ctrl_c().await;
            }
        };
        tokio::select! {
            name = ctrl_c() => name,
            _ = terminate.recv() => Some("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> Option<&'static str> {
    match signal::ctrl_c().await {
        Ok(()) => Some("SIGINT"),
        Err(e) => {
            error!("Failed to install SIGINT handler: {e}");
            None
        }
    }
}

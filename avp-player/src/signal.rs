//! Ctrl+C / SIGTERM handling
//!
//! Playback threads are plain OS threads, so signals are awaited on a small
//! current-thread tokio runtime in its own thread. A signal cancels the quit
//! token, which the presentation surface reports as a `Quit` event.

use crate::error::Result;
use std::thread::{self, JoinHandle};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Background thread waiting for a shutdown signal.
pub struct SignalWatcher {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

impl SignalWatcher {
    /// Start watching; `quit` is cancelled when a signal arrives.
    pub fn spawn(quit: CancellationToken) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let stop = CancellationToken::new();
        let watcher_stop = stop.clone();

        let handle = thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    tokio::select! {
                        _ = shutdown_signal() => quit.cancel(),
                        _ = watcher_stop.cancelled() => {}
                    }
                });
            })?;

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    /// Stop watching and join the thread.
    pub fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => debug!("Signal watcher joined"),
                Err(e) => error!("Signal watcher join failed: {:?}", e),
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_without_signal() {
        let quit = CancellationToken::new();
        let watcher = SignalWatcher::spawn(quit.clone()).unwrap();
        watcher.shutdown();
        assert!(!quit.is_cancelled());
    }
}

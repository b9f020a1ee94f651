use tokio::sync::mpsc;
use tracing::error;

/// A handle for managing graceful shutdown of the application
pub struct ShutdownManager {
    /// Receiver for shutdown signals
    rx: mpsc::Receiver<()>,
}

impl ShutdownManager {
    /// Create a new ShutdownManager and setup signal handlers
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);

        // Setup Ctrl+C handler
        let tx_clone = tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    let _ = tx_clone.send(()).await;
                }
                Err(err) => {
                    error!("Error listening for ctrl+c: {}", err);
                }
            }
        });

        // Setup SIGTERM handler on Unix platforms
        #[cfg(unix)]
        {
            let tx_clone = tx.clone();
            tokio::spawn(async move {
                let mut term_signal =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("Failed to install SIGTERM handler");

                term_signal.recv().await;
                let _ = tx_clone.send(()).await;
            });
        }

        ShutdownManager { rx }
    }

    /// Wait until a shutdown signal arrives
    pub async fn recv(&mut self) {
        let _ = self.rx.recv().await;
    }
}

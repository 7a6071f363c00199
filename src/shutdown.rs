//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] resolves on Ctrl+C, SIGTERM, or a programmatic
//! [`ShutdownSignal::trigger`]. The binary hands it to axum's graceful
//! shutdown and closes the hub once it fires, which ends every subscriber
//! session.
//!
//! # Example
//!
//! ```rust,ignore
//! let shutdown = ShutdownSignal::new();
//! let hub_shutdown = shutdown.clone();
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(async move {
//!         hub_shutdown.wait().await;
//!         hub.close();
//!     })
//!     .await?;
//! ```

use tokio::sync::watch;
use tracing::{error, info};

/// A signal for coordinating graceful shutdown across components.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Wait for an OS termination signal or a manual trigger.
    ///
    /// Returns immediately if shutdown was already triggered. When the
    /// wait ends, every clone observes the shutdown.
    pub async fn wait(&self) {
        let mut triggered = self.sender.subscribe();
        if *triggered.borrow_and_update() {
            return;
        }

        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let manual = async {
            let _ = triggered.wait_for(|stopped| *stopped).await;
        };

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = manual => {
                return;
            }
        }

        self.sender.send_replace(true);
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown manually (for tests or programmatic shutdown).
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.sender.send_replace(true);
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

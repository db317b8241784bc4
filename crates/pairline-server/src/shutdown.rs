//! Process shutdown sequence.
//!
//! Streams and the listener stop first so nothing new arrives, then the
//! active session is destroyed (credentials kept), then whatever background
//! work is left gets a bounded wait.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller::SessionController;

/// What the shutdown sequence managed to finish within its time limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub listener_stopped: bool,
    pub background_drained: bool,
}

pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// `timeout` bounds each waiting phase separately.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Cancelled when the sequence starts; open streams and the listener
    /// watch it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub async fn run(
        &self,
        mut server: JoinHandle<()>,
        controller: &SessionController,
    ) -> ShutdownReport {
        info!(timeout_secs = self.timeout.as_secs(), "shutting down");
        self.token.cancel();

        let listener_stopped = match tokio::time::timeout(self.timeout, &mut server).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "server task ended abnormally");
                true
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "listener did not stop in time, aborting it");
                server.abort();
                false
            }
        };

        controller.shutdown().await;

        let background_drained = controller
            .background()
            .drain_with_timeout(self.timeout)
            .await;
        if !background_drained {
            warn!(timeout = ?self.timeout, "background tasks still running at shutdown");
        }

        ShutdownReport {
            listener_stopped,
            background_drained,
        }
    }
}

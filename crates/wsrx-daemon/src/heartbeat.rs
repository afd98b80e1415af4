//! Heartbeat watchdog
//!
//! A controller that launches the daemon keeps pinging `/heartbeat`. Once a
//! full timeout passes without one, the watchdog resolves and the daemon
//! stops, so a crashed controller never leaves tunnels behind.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error};

/// Time of the last heartbeat, shared by the handler and the watchdog
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last: Arc<RwLock<Instant>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            last: Arc::new(RwLock::new(Instant::now())),
        }
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn beat(&self) {
        *self.last.write().await = Instant::now();
    }

    pub async fn last(&self) -> Instant {
        *self.last.read().await
    }

    /// Resolve once `timeout` has passed since the last heartbeat
    pub async fn watchdog(self, timeout: Duration) {
        loop {
            let deadline = self.last().await + timeout;
            if Instant::now() >= deadline {
                error!("No heartbeat for {:?}, stopping", timeout);
                return;
            }
            tokio::time::sleep_until(deadline).await;
            debug!("Heartbeat check, last one {:?} ago", self.last().await.elapsed());
        }
    }
}

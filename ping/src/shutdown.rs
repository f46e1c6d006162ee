use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Process-wide shutdown signal. Triggering it is idempotent and wakes every task waiting in
///  [Shutdown::triggered], so workers can include it in their `select!` alongside I/O
///  readiness.
#[derive(Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Shutdown::new()
    }
}

impl Shutdown {
    pub fn new() -> Shutdown {
        let (sender, _) = watch::channel(false);
        Shutdown {
            sender: Arc::new(sender),
        }
    }

    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            debug!("shutdown triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// completes when shutdown was triggered, immediately if that happened before the call
    pub async fn triggered(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender is owned by self, so the channel can not be closed while waiting
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    #[tokio::test(start_paused = true)]
    async fn test_trigger_wakes_waiters() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        let waiters = (0..3)
            .map(|_| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move { shutdown.triggered().await })
            })
            .collect::<Vec<_>>();

        sleep(Duration::from_millis(10)).await;
        for w in &waiters {
            assert!(!w.is_finished());
        }

        shutdown.trigger();
        for w in waiters {
            timeout(Duration::from_millis(1), w).await.unwrap().unwrap();
        }
        assert!(shutdown.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_triggered_before_wait() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();

        timeout(Duration::from_millis(1), shutdown.triggered()).await.unwrap();
    }
}

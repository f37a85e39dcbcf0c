// Shutdown Token

use tokio::sync::watch;

/// Shutdown signal for graceful termination
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for shutdown signal. Returns immediately if it was already sent.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

/// Shutdown sender
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal shutdown to every token
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let (tx, token) = shutdown_channel();
        tx.shutdown();

        let mut late = token.clone();
        assert!(late.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), late.wait())
            .await
            .expect("wait should return once shutdown was signalled");
    }

    #[tokio::test]
    async fn test_wait_blocks_until_signal() {
        let (tx, mut token) = shutdown_channel();
        let waiter = tokio::spawn(async move { token.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.shutdown();
        waiter.await.unwrap();
    }
}

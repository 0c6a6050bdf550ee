//! External cancellation for long-running playback and export work.

use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of a cancellation flag. Cloning shares the same flag.
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Raise the flag. Returns `true` only for the call that raised it.
    pub fn abort(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the flag is raised; pends forever if the controller is
    /// dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_abort_is_idempotent() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.is_aborted());
        assert!(controller.abort());
        assert!(!controller.abort());
        assert!(signal.is_aborted());
        assert!(controller.clone().is_aborted());
    }

    #[tokio::test]
    async fn test_aborted_resolves_after_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { signal.aborted().await });
        tokio::time::sleep(Duration::from_millis(5)).await;
        controller.abort();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_never_signal_pends() {
        let signal = AbortSignal::never();
        let result = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_signal_taken_after_abort_is_already_raised() {
        let controller = AbortController::new();
        controller.abort();
        let signal = controller.signal();
        tokio::time::timeout(Duration::from_millis(50), signal.aborted())
            .await
            .unwrap();
    }
}

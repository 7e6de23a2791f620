//! Cooperative cancellation of a run.

use tokio::sync::watch;
use tokio::time::Instant;

/// Observes the external abort signal and the optional run deadline.
///
/// Cloning is cheap; every task of a run holds its own copy.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    abort: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self {
            abort: None,
            deadline: None,
        }
    }

    /// Fires when `true` is sent on the channel (or the sender is dropped
    /// after sending it).
    pub fn from_receiver(abort: watch::Receiver<bool>) -> Self {
        Self {
            abort: Some(abort),
            deadline: None,
        }
    }

    /// Adds a deadline after which the signal fires.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Returns true once the run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        let aborted = self.abort.as_ref().is_some_and(|rx| *rx.borrow());
        let expired = self.deadline.is_some_and(|d| Instant::now() >= d);
        aborted || expired
    }

    /// Completes when the run is cancelled. Never completes for
    /// [`CancellationSignal::never`].
    pub async fn cancelled(&self) {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let abort = async {
            match self.abort.clone() {
                Some(mut rx) => {
                    if rx.wait_for(|aborted| *aborted).await.is_err() {
                        // Sender dropped without aborting.
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = deadline => {}
            _ = abort => {}
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_abort_channel() {
        let (tx, rx) = watch::channel(false);
        let signal = CancellationSignal::from_receiver(rx);
        assert!(!signal.is_cancelled());
        tx.send(true).unwrap();
        assert!(signal.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let signal =
            CancellationSignal::never().with_deadline(Instant::now() + Duration::from_secs(30));
        assert!(!signal.is_cancelled());
        signal.cancelled().await;
        assert!(signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fires() {
        let signal = CancellationSignal::never();
        let waited = tokio::time::timeout(Duration::from_secs(3600), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let signal = CancellationSignal::from_receiver(rx);
        let waited = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(waited.is_err());
    }
}

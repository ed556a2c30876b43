//! Cancellation signal shared by long-running operations.
//!
//! A `true` on the channel means "stop now". A dropped sender never
//! cancels anything.

use tokio::sync::watch;

pub type CancelSender = watch::Sender<bool>;
pub type CancelReceiver = watch::Receiver<bool>;

pub fn cancel_channel() -> (CancelSender, CancelReceiver) {
    watch::channel(false)
}

/// Whether cancellation has already been requested.
pub fn is_cancelled(rx: &CancelReceiver) -> bool {
    *rx.borrow()
}

/// Resolve once cancellation is requested; pend forever otherwise.
pub async fn cancelled(rx: Option<CancelReceiver>) {
    if let Some(mut rx) = rx {
        if rx.wait_for(|cancel| *cancel).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancelled_resolves_on_signal() {
        let (tx, rx) = cancel_channel();
        let waiter = tokio::spawn(cancelled(Some(rx)));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancel should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = cancel_channel();
        drop(tx);
        let result = tokio::time::timeout(Duration::from_millis(50), cancelled(Some(rx))).await;
        assert!(result.is_err());
    }
}

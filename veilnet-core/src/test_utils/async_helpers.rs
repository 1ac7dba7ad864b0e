//! Async test helpers
//!
//! Receiving from channels without hanging a test forever.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Receive from an unbounded channel with a timeout
pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

impl std::fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecvTimeoutError::Timeout => write!(f, "receive operation timed out"),
            RecvTimeoutError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for RecvTimeoutError {}

/// Run a future, panicking with `what` if it does not finish in time.
pub async fn within<F: Future>(duration: Duration, what: &str, fut: F) -> F::Output {
    match timeout(duration, fut).await {
        Ok(out) => out,
        Err(_) => panic!("{} did not complete within {:?}", what, duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_timeout_reports_timeout_and_close() {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );
        tx.send(7).unwrap();
        assert_eq!(recv_timeout(&mut rx, Duration::from_millis(10)).await, Ok(7));
        drop(tx);
        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Closed)
        );
    }

    #[tokio::test]
    #[should_panic(expected = "slow thing did not complete")]
    async fn test_within_panics_on_timeout() {
        within(Duration::from_millis(5), "slow thing", std::future::pending::<()>()).await;
    }
}

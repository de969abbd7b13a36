//! Period-aligned token notifications

use crate::secret::{unix_now, TokenProvider};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Background task that calls back with a fresh token at every period
/// boundary (`:00` and `:30` for a 30 second period).
///
/// Nothing fires inside a period. Dropping the ticker cancels it.
pub struct TokenTicker {
    handle: JoinHandle<()>,
}

impl TokenTicker {
    /// Start ticking. Must be called from within a tokio runtime.
    pub fn spawn<F>(provider: TokenProvider, mut callback: F) -> Self
    where
        F: FnMut(String) + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                let now = match unix_now() {
                    Ok(now) => now,
                    Err(e) => {
                        warn!("Token ticker stopped: {}", e);
                        return;
                    }
                };
                let boundary = provider.next_boundary(now.as_secs());
                let wait = Duration::from_secs(boundary).saturating_sub(now);
                tokio::time::sleep(wait).await;

                debug!("Token period rolled over at {}", boundary);
                callback(provider.at(boundary));
            }
        });

        Self { handle }
    }

    /// Stop the ticker; no callback runs afterwards
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TokenTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entangle_core::Algorithm;

    // One-second period so a boundary is never far away
    fn provider() -> TokenProvider {
        TokenProvider::new("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ", 1, 6, Algorithm::Sha1).unwrap()
    }

    #[tokio::test]
    async fn test_fires_at_boundary() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _ticker = TokenTicker::spawn(provider(), move |token| {
            let _ = tx.send(token);
        });

        let token = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.len(), 6);
    }

    #[tokio::test]
    async fn test_cancel_stops_callbacks() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let ticker = TokenTicker::spawn(provider(), move |token| {
            let _ = tx.send(token);
        });
        ticker.cancel();
        tokio::task::yield_now().await;

        // The callback (and its sender) is dropped with the aborted task
        let next = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap();
        assert_eq!(next, None);
    }
}

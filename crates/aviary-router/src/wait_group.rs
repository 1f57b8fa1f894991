//! A small async wait-group: `add`/`done` track live workers, `wait` blocks
//! up to a deadline for the count to reach zero.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Default)]
pub struct WaitGroup {
    count: AtomicI64,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, n: i64) {
        self.count.fetch_add(n, Ordering::SeqCst);
    }

    pub fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) <= 1 {
            self.notify.notify_waiters();
        }
    }

    /// Wait up to `timeout` for the count to reach zero. Returns `true` if it did.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count.load(Ordering::SeqCst) <= 0 {
                return true;
            }
            let notified = self.notify.notified();
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return self.count.load(Ordering::SeqCst) <= 0;
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_immediately_when_empty() {
        let wg = WaitGroup::new();
        assert!(wg.wait(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn wait_unblocks_when_last_done_fires() {
        let wg = std::sync::Arc::new(WaitGroup::new());
        wg.add(1);
        let wg2 = std::sync::Arc::clone(&wg);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            wg2.done();
        });
        assert!(wg.wait(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn wait_times_out_when_never_done() {
        let wg = WaitGroup::new();
        wg.add(1);
        assert!(!wg.wait(Duration::from_millis(30)).await);
    }
}

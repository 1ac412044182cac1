//! Send credit for one SSH channel
//!
//! Tracks how many bytes the client is currently willing to receive. The
//! pod reader takes credit before every read, so an exhausted window stops
//! pod reads instead of buffering output in the gateway.

use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Debug)]
struct WindowState {
    credit: usize,
    closed: bool,
}

#[derive(Debug)]
pub struct SendWindow {
    state: Mutex<WindowState>,
    notify: Notify,
}

impl SendWindow {
    pub fn new(initial: usize) -> Self {
        Self {
            state: Mutex::new(WindowState {
                credit: initial,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Take up to `max` bytes of credit, waiting while the window is empty.
    /// Returns `None` once the window is closed.
    pub async fn acquire(&self, max: usize) -> Option<usize> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if state.credit > 0 && max > 0 {
                    let take = state.credit.min(max);
                    state.credit -= take;
                    return Some(take);
                }
            }

            notified.await;
        }
    }

    /// Hand back credit that was acquired but not used
    pub fn release(&self, unused: usize) {
        if unused == 0 {
            return;
        }
        self.lock().credit += unused;
        self.notify.notify_waiters();
    }

    /// Set the credit to the window the peer last advertised
    pub fn reset(&self, available: usize) {
        self.lock().credit = available;
        self.notify.notify_waiters();
    }

    /// Wake every waiter with `None`; the window stays closed
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn available(&self) -> usize {
        self.lock().credit
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_is_bounded_by_credit() {
        let window = SendWindow::new(10);
        assert_eq!(window.acquire(4).await, Some(4));
        assert_eq!(window.acquire(100).await, Some(6));
        assert_eq!(window.available(), 0);

        window.release(3);
        assert_eq!(window.acquire(100).await, Some(3));
    }

    #[tokio::test]
    async fn test_empty_window_waits_for_reset() {
        let window = Arc::new(SendWindow::new(0));
        let waiter = {
            let window = window.clone();
            tokio::spawn(async move { window.acquire(8).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        window.reset(5);
        assert_eq!(waiter.await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let window = Arc::new(SendWindow::new(0));
        let waiter = {
            let window = window.clone();
            tokio::spawn(async move { window.acquire(8).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        window.close();
        assert_eq!(waiter.await.unwrap(), None);
        assert_eq!(window.acquire(1).await, None);
    }
}

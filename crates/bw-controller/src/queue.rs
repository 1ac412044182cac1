//! Deduplicating work queue keyed by instance name
//!
//! A key is queued at most once however often it is added. A key handed to
//! a worker is not handed to another until the first calls [`WorkQueue::done`];
//! adds that arrive in between are coalesced and re-queued on `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use bw_core::config::BackoffConfig;

use crate::backoff::ExponentialBackoff;

#[derive(Default)]
struct QueueState {
    queue: VecDeque<String>,
    /// Keys waiting to be processed
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    /// Per-key retry backoff, present while a key keeps failing
    limiters: HashMap<String, ExponentialBackoff>,
    shutdown: bool,
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: BackoffConfig,
}

impl WorkQueue {
    pub fn new(backoff: BackoffConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        })
    }

    /// Queue `key` unless it is already waiting
    pub async fn add(&self, key: &str) {
        let mut state = self.state.lock().await;
        if state.shutdown || !state.dirty.insert(key.to_string()) {
            return;
        }
        if !state.processing.contains(key) {
            state.queue.push_back(key.to_string());
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has passed
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key).await;
        });
    }

    /// Queue `key` after its next backoff delay; returns the delay
    pub async fn add_rate_limited(self: &Arc<Self>, key: &str) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            state
                .limiters
                .entry(key.to_string())
                .or_insert_with(|| ExponentialBackoff::from_config(&self.backoff))
                .next_delay()
        };
        self.add_after(key, delay);
        delay
    }

    /// Retries recorded for `key` since it last succeeded
    pub async fn failures(&self, key: &str) -> u32 {
        let state = self.state.lock().await;
        state.limiters.get(key).map_or(0, |b| b.attempts())
    }

    /// Reset the retry backoff of `key`
    pub async fn forget(&self, key: &str) {
        self.state.lock().await.limiters.remove(key);
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, re-queueing it if it was added meanwhile
    pub async fn done(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutdown {
            state.queue.push_back(key.to_string());
            self.notify.notify_one();
        }
    }

    /// Keys waiting to be processed
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out keys and wake every waiting worker
    pub async fn shutdown(&self) {
        self.state.lock().await.shutdown = true;
        self.notify.notify_waiters();
    }
}

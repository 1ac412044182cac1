//! Live exec sessions per pod

use dashmap::DashMap;
use portable_pty::ChildKiller;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kill handles of the processes running inside each pod
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    pods: DashMap<String, Vec<(u64, Box<dyn ChildKiller + Send + Sync>)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a process started in `pod`; returns the id to remove it with
    pub fn register(&self, pod: &str, killer: Box<dyn ChildKiller + Send + Sync>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pods
            .entry(pod.to_string())
            .or_default()
            .push((id, killer));
        id
    }

    /// Forget a process that has exited
    pub fn unregister(&self, pod: &str, id: u64) {
        let now_empty = match self.pods.get_mut(pod) {
            Some(mut sessions) => {
                sessions.retain(|(sid, _)| *sid != id);
                sessions.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.pods.remove_if(pod, |_, sessions| sessions.is_empty());
        }
    }

    /// Kill every process in `pod`; returns how many were signalled
    pub fn kill_pod(&self, pod: &str) -> usize {
        let Some((_, mut sessions)) = self.pods.remove(pod) else {
            return 0;
        };
        for (id, killer) in sessions.iter_mut() {
            if let Err(e) = killer.kill() {
                tracing::debug!("Session {} in pod {} already gone: {}", id, pod, e);
            }
        }
        sessions.len()
    }

    /// Number of live sessions in `pod`
    pub fn count(&self, pod: &str) -> usize {
        self.pods.get(pod).map_or(0, |s| s.len())
    }

    /// Number of live sessions across all pods
    pub fn total(&self) -> usize {
        self.pods.iter().map(|s| s.len()).sum()
    }
}

//! Optimistic concurrency retry

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use bw_core::StoreError;

/// Conflicts tolerated before the error is returned to the caller
pub const MAX_CONFLICT_RETRIES: usize = 8;

/// Run a read-modify-write closure, re-running it from a fresh read while
/// the store reports a version conflict.
pub async fn retry_on_conflict<T, F, Fut>(mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut conflicts = 0;
    loop {
        match attempt().await {
            Err(e) if e.is_conflict() && conflicts < MAX_CONFLICT_RETRIES => {
                conflicts += 1;
                debug!("{}; retrying ({}/{})", e, conflicts, MAX_CONFLICT_RETRIES);
                let pause = rand::random::<u64>() % (5 * conflicts as u64 + 1);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
            other => return other,
        }
    }
}

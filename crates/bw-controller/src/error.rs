//! Reconcile errors

use thiserror::Error;

use bw_core::{FailureCategory, StoreError};

/// Why a reconcile did not converge
#[derive(Error, Debug, Clone)]
pub enum ReconcileError {
    /// Resource store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The instance can never converge as specified
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// No node can take the pod right now
    #[error("pod unschedulable: {0}")]
    Unschedulable(String),

    /// The pod's process ended and the pod was removed for recreation
    #[error("pod {0} exited")]
    PodExited(String),

    #[error("reconcile task panicked")]
    Panicked,
}

impl ReconcileError {
    /// Retrying cannot help
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReconcileError::InvalidSpec(_) | ReconcileError::Store(StoreError::Invalid { .. })
        )
    }

    /// A lost optimistic-concurrency race; retried without consuming budget
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }

    /// Category recorded when this error fails the instance
    pub fn failure_category(&self) -> FailureCategory {
        match self {
            ReconcileError::Store(e) if e.is_capacity() => FailureCategory::Capacity,
            ReconcileError::Unschedulable(_) => FailureCategory::Capacity,
            ReconcileError::InvalidSpec(_) | ReconcileError::Store(StoreError::Invalid { .. }) => {
                FailureCategory::InvalidSpec
            }
            _ => FailureCategory::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::Kind;

    #[test]
    fn test_capacity_classification() {
        let quota = ReconcileError::Store(StoreError::QuotaExceeded("pods".into()));
        assert_eq!(quota.failure_category(), FailureCategory::Capacity);
        assert!(!quota.is_terminal());

        let full = ReconcileError::Unschedulable("node full".into());
        assert_eq!(full.failure_category(), FailureCategory::Capacity);

        let invalid = ReconcileError::Store(StoreError::Invalid {
            kind: Kind::Pod,
            name: "x".into(),
            reason: "bad".into(),
        });
        assert!(invalid.is_terminal());
        assert_eq!(invalid.failure_category(), FailureCategory::InvalidSpec);

        assert_eq!(
            ReconcileError::PodExited("alice-web-pod".into()).failure_category(),
            FailureCategory::Other
        );
    }
}

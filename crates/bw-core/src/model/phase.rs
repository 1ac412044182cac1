//! Instance lifecycle phases

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Provisioning,
    Ready,
    Terminating,
    Failed,
    Deleted,
}

impl Phase {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Staying in the same phase is always allowed. The only backward edge
    /// is Ready to Provisioning, taken when a ready instance loses its pod.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;

        if self == next {
            return true;
        }
        match (self, next) {
            (Pending, Provisioning) | (Pending, Ready) | (Pending, Failed) => true,
            (Provisioning, Ready) | (Provisioning, Failed) => true,
            (Ready, Provisioning) | (Ready, Failed) => true,
            (Pending | Provisioning | Ready | Failed, Terminating) => true,
            (Terminating, Deleted) => true,
            _ => false,
        }
    }

    /// Whether the phase only changes through deletion from here on
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Failed | Phase::Deleted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "Pending",
            Phase::Provisioning => "Provisioning",
            Phase::Ready => "Ready",
            Phase::Terminating => "Terminating",
            Phase::Failed => "Failed",
            Phase::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::Phase::*;

    #[test]
    fn test_forward_edges() {
        assert!(Pending.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Provisioning));
        assert!(Provisioning.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Terminating));
        assert!(Terminating.can_transition_to(Deleted));
        assert!(Failed.can_transition_to(Terminating));
    }

    #[test]
    fn test_self_heal_is_the_only_backward_edge() {
        assert!(Ready.can_transition_to(Provisioning));
        assert!(!Terminating.can_transition_to(Provisioning));
        assert!(!Terminating.can_transition_to(Ready));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Deleted.can_transition_to(Pending));
        assert!(!Provisioning.can_transition_to(Pending));
    }
}

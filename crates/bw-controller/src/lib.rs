//! bw-controller: Reconciliation controller for burrow
//!
//! The controller keeps every session instance converged: it computes the
//! pod and claim an instance needs, creates or removes them, and writes the
//! observed phase back to the instance status. It is level-triggered. Watch
//! events and a periodic resync only enqueue instance names; a worker then
//! recomputes everything from the current store state.
//!
//! Ready ephemeral and preemptible instances that stay idle past their
//! timeout are deleted by the idle sweep.

pub mod backoff;
pub mod controller;
pub mod desired;
pub mod error;
pub mod gc;
pub mod queue;
pub mod reconciler;

pub use backoff::ExponentialBackoff;
pub use controller::Controller;
pub use error::ReconcileError;
pub use gc::IdleCollector;
pub use queue::WorkQueue;
pub use reconciler::{Action, Reconciler};

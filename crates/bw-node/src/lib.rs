//! bw-node: Local node runtime for burrow
//!
//! This crate runs the pods of the local backend: [`NodeRuntime`] admits
//! pods and binds claims written to the store, and [`LocalExecutor`]
//! implements [`bw_core::traits::PodExecutor`] by starting the pod's shell
//! in a host pseudo-terminal.

pub mod exec;
pub mod runtime;
pub mod sessions;
pub mod shell;

pub use exec::LocalExecutor;
pub use runtime::NodeRuntime;
pub use sessions::SessionRegistry;

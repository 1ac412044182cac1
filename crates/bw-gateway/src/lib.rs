//! bw-gateway: SSH front door for burrow sessions
//!
//! Accepts SSH logins of the form `owner[-selector]`, routes each one to a
//! Ready instance (creating it from a template when the kind allows), and
//! bridges the SSH channel into the instance pod's exec stream. Also hosts
//! the admin IPC server used by the `burrow` CLI.

pub mod admin;
pub mod auth;
pub mod bridge;
pub mod error;
pub mod ipc;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use error::{BridgeError, RouteError};
pub use router::{Route, Router};
pub use state::GatewayState;

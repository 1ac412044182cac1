//! SSH server for user logins

mod handler;
mod listener;

pub use handler::{ConnectionHandler, ServerConfig};
pub use listener::SshServer;

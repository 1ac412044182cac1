//! Admin IPC over localhost TCP

mod server;

pub use server::IpcServer;

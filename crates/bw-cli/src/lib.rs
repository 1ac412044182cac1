//! bw-cli: the `burrow` binary
//!
//! Runs the whole system in one process (`burrow serve`) and talks to a
//! running gateway over its localhost IPC port for everything else.

pub mod commands;
pub mod ipc;
pub mod output;

//! IPC client for the gateway's admin port

mod client;

pub use client::{CreateInstance, GatewayClient};

pub use bw_core::ipc::{GatewayStatus, InstanceInfo, IpcEvent, TemplateInfo};

//! `burrow serve`: store, node, controller and gateway in one process

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use bw_controller::Controller;
use bw_core::config::StoreConfig;
use bw_core::traits::ResourceStore;
use bw_gateway::auth::{load_or_generate_host_key, UserKeys};
use bw_gateway::ipc::IpcServer;
use bw_gateway::server::SshServer;
use bw_gateway::GatewayState;
use bw_node::NodeRuntime;
use bw_store::{snapshot, MemoryStore};

use super::config::load_effective_config;
use crate::output::print_warning;

/// Flags that override the configuration file
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub bind: Option<String>,
    pub ipc_port: Option<u16>,
}

/// Run everything until Ctrl+C or SIGTERM
pub async fn serve_command(config_path: Option<&PathBuf>, overrides: ServeOverrides) -> Result<()> {
    let mut config = load_effective_config(config_path)?;
    if let Some(bind) = overrides.bind {
        config.gateway.bind_address = bind;
    }
    if let Some(port) = overrides.ipc_port {
        config.gateway.ipc_port = port;
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("burrow {} starting", env!("CARGO_PKG_VERSION"));
    if config.gateway.allow_unknown_users {
        print_warning("allow_unknown_users is set: any public key is accepted for any owner");
    }

    let store = Arc::new(open_store(&config.store)?);
    let dyn_store: Arc<dyn ResourceStore> = store.clone();

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let node = NodeRuntime::new(config.node.clone(), dyn_store.clone());
    let controller = Controller::new(config.controller.clone(), dyn_store.clone());

    let users = UserKeys::load(&config.gateway.users_file)?;
    tracing::info!(
        "Loaded {} keys for {} users from {}",
        users.key_count(),
        users.user_count(),
        config.gateway.users_file.display()
    );

    let state = Arc::new(GatewayState::new(
        config.gateway.clone(),
        dyn_store,
        controller.template_cache().clone(),
        controller.instance_cache().clone(),
        Arc::new(node.executor()),
        users,
    ));

    let host_key = load_or_generate_host_key(&config.gateway.host_key_path).await?;
    let fingerprint = host_key
        .clone_public_key()
        .context("Failed to extract public key from host key")?
        .fingerprint();
    tracing::info!("Host key fingerprint: {}", fingerprint);

    let node_task = tokio::spawn(node.run(cancel.clone()));
    let controller_task = tokio::spawn(controller.run(cancel.clone()));
    let snapshot_task = config.store.snapshot_path.clone().map(|path| {
        tokio::spawn(snapshot_loop(
            store.clone(),
            path,
            config.store.snapshot_interval,
            cancel.clone(),
        ))
    });

    let ipc = IpcServer::new(config.gateway.ipc_address(), state.clone(), cancel.clone());
    let ipc_task = tokio::spawn(async move {
        if let Err(e) = ipc.run().await {
            tracing::error!("IPC server error: {}", e);
        }
    });

    println!();
    println!("  burrow gateway");
    println!();
    println!("  SSH:       {}", config.gateway.bind_address);
    println!("  Admin IPC: {}", config.gateway.ipc_address());
    println!("  Host key:  {}", fingerprint);
    println!();
    println!("  Connect with: ssh <user>-<template>@<host>");
    println!();

    let server = SshServer::new(host_key, state, cancel.clone());
    let result = server.run(&config.gateway.bind_address).await;
    // a failed bind must still stop everything else
    cancel.cancel();

    let _ = ipc_task.await;
    let _ = controller_task.await;
    let _ = node_task.await;
    if let Some(task) = snapshot_task {
        let _ = task.await;
    }
    if let Some(path) = &config.store.snapshot_path {
        save_snapshot(&store, path).await;
    }

    tracing::info!("burrow shutdown complete");
    result
}

/// Restore the store from its snapshot, or start empty
fn open_store(config: &StoreConfig) -> Result<MemoryStore> {
    let Some(path) = &config.snapshot_path else {
        tracing::info!("No snapshot path configured; state is not persisted");
        return Ok(MemoryStore::with_history_limit(config.history_limit));
    };

    let loaded = snapshot::load(path)
        .with_context(|| format!("Failed to load snapshot from {}", path.display()))?;
    match loaded {
        Some(data) => {
            tracing::info!(
                "Restored {} objects at version {} from {}",
                data.objects.len(),
                data.resource_version,
                path.display()
            );
            Ok(MemoryStore::from_snapshot(data, config.history_limit))
        }
        None => {
            tracing::info!("No snapshot at {}; starting empty", path.display());
            Ok(MemoryStore::with_history_limit(config.history_limit))
        }
    }
}

async fn save_snapshot(store: &MemoryStore, path: &Path) {
    let data = store.snapshot().await;
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || snapshot::save(&path, &data)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!("Failed to write snapshot: {}", e),
        Err(e) => tracing::error!("Snapshot task failed: {}", e),
    }
}

async fn snapshot_loop(
    store: Arc<MemoryStore>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.tick().await;
    let mut saved_at = store.resource_version().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let version = store.resource_version().await;
                if version != saved_at {
                    save_snapshot(&store, &path).await;
                    saved_at = version;
                }
            }
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}

//! One SSH session channel, from login to teardown

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bw_core::naming::pod_name;
use bw_core::time::current_time_millis;
use bw_core::traits::ExecRequest;
use bw_core::TerminalSize;

use crate::admin::render_listing;
use crate::bridge::{Activity, Bridge, BridgeConfig, ClientChannel, ClientInput, SendWindow};
use crate::error::RouteError;
use crate::router::Route;
use crate::state::GatewayState;

/// Client-side plumbing of one session channel
pub struct SessionIo<C> {
    pub channel: C,
    pub input: mpsc::Receiver<ClientInput>,
    pub resize: mpsc::Receiver<TerminalSize>,
    pub window: Arc<SendWindow>,
}

/// Route `login` and serve the result on the channel: an error line with
/// exit status 1, the admin listing with 0, or a bridged pod session.
pub async fn run_session<C: ClientChannel>(
    state: Arc<GatewayState>,
    login: String,
    request: ExecRequest,
    io: SessionIo<C>,
    cancel: CancellationToken,
) {
    let route = match state.router.route(&login, &cancel).await {
        Ok(route) => route,
        Err(RouteError::Cancelled) => {
            info!("Connection for {} closed while routing", login);
            return;
        }
        Err(e) => {
            info!("Refusing session for {}: {}", login, e);
            let _ = io.channel.message(&format!("burrow: {}", e)).await;
            io.channel.finish(1).await;
            return;
        }
    };

    let instance = match route {
        Route::Admin { owner } => {
            let listing = render_listing(
                &owner,
                &state.router.templates().list(),
                &state.router.instances().list(),
                current_time_millis(),
            );
            let _ = io.channel.message(&listing).await;
            io.channel.finish(0).await;
            return;
        }
        Route::Session(instance) => instance,
    };

    let name = instance.name().to_string();
    let pod = instance
        .status
        .pod_ref
        .clone()
        .unwrap_or_else(|| pod_name(&name));

    let exec = match state.executor.exec(&pod, request).await {
        Ok(exec) => exec,
        Err(e) => {
            warn!(instance = %name, "Exec into {} failed: {}", pod, e);
            let _ = io
                .channel
                .message(&format!("burrow: could not start a session in '{}': {}", name, e))
                .await;
            io.channel.finish(1).await;
            return;
        }
    };

    let _session = state.track_session();
    info!(instance = %name, "Session started for {} on pod {}", login, pod);

    let activity = Arc::new(Activity::default());
    let stop_touch = cancel.child_token();
    let toucher = tokio::spawn(touch_loop(
        state.clone(),
        name.clone(),
        activity.clone(),
        state.config.touch_interval,
        stop_touch.clone(),
    ));

    let bridge = Bridge::new(
        BridgeConfig::from(&state.config),
        io.channel,
        io.window,
        activity.clone(),
    );
    let outcome = bridge.run(exec, io.input, io.resize, cancel).await;

    stop_touch.cancel();
    let _ = toucher.await;
    if activity.take() > 0 {
        state.router.touch(&name);
    }

    info!(
        instance = %name,
        "Session for {} ended ({:?}, exit {:?}, {} bytes out, {} bytes in)",
        login,
        outcome.end,
        outcome.exit.and_then(|s| s.code),
        outcome.bytes_to_client,
        outcome.bytes_to_pod
    );
}

/// Re-touch the instance each interval in which bytes moved
async fn touch_loop(
    state: Arc<GatewayState>,
    name: String,
    activity: Arc<Activity>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if activity.take() > 0 {
                    state.router.touch(&name);
                }
            }
        }
    }
}

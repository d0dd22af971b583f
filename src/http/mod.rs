//! Debug HTTP server surfaced only in debug feature builds.
//!
//! This module spawns a lightweight Axum server that exposes health, the
//! latest published session state, telemetry diagnostics and an SSE stream
//! of verdicts.

#[cfg(all(feature = "debug_http", debug_assertions))]
mod routes;
#[cfg(all(feature = "debug_http", debug_assertions))]
mod sse;

use crate::session::SessionBroadcasts;

#[cfg(all(feature = "debug_http", debug_assertions))]
pub use routes::{build_router, DebugHttpState};

#[cfg(all(feature = "debug_http", debug_assertions))]
use routes::run_http_server;

#[cfg(all(feature = "debug_http", debug_assertions))]
use log::{error, info, warn};
#[cfg(all(feature = "debug_http", debug_assertions))]
use std::net::SocketAddr;
#[cfg(all(feature = "debug_http", debug_assertions))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(all(feature = "debug_http", debug_assertions))]
use std::thread;

#[cfg(all(feature = "debug_http", debug_assertions))]
static SERVER_STARTED: AtomicBool = AtomicBool::new(false);

/// Spawn the debug HTTP server only when the feature flag and debug builds are enabled.
///
/// `GUITAR_TRAINER_DEBUG_HTTP_ADDR` overrides the bind address (default
/// 127.0.0.1:8787); when `GUITAR_TRAINER_DEBUG_TOKEN` is set every request
/// must carry it.
#[cfg(all(feature = "debug_http", debug_assertions))]
pub fn spawn_if_enabled(broadcasts: SessionBroadcasts) {
    if SERVER_STARTED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("[DebugHttp] Server already running");
        return;
    }

    let addr: SocketAddr = std::env::var("GUITAR_TRAINER_DEBUG_HTTP_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8787)));

    let token = std::env::var("GUITAR_TRAINER_DEBUG_TOKEN").ok();

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("[DebugHttp] Failed to build tokio runtime: {}", err);
                SERVER_STARTED.store(false, Ordering::SeqCst);
                return;
            }
        };

        info!(
            "[DebugHttp] Binding {} ({})",
            addr,
            if token.is_some() { "token required" } else { "no token" }
        );

        runtime.block_on(async move {
            let state = DebugHttpState::new(broadcasts, token);
            if let Err(err) = run_http_server(state, addr).await {
                error!("[DebugHttp] Server stopped: {}", err);
            }
        });
    });
}

#[cfg(not(all(feature = "debug_http", debug_assertions)))]
#[allow(unused_variables)]
pub fn spawn_if_enabled(_broadcasts: SessionBroadcasts) {
    // Debug HTTP server disabled in this build.
}

use std::net::SocketAddr;

// Spirit shrine engine
//
// Backend for the shrine scene:
//   - Load the spirit list once at startup
//   - Rotate through it on a fixed interval while anyone is watching
//   - Push each spirit to every connected browser over a WebSocket
//   - Serve the browser client (static files) and a couple of JSON endpoints

mod broadcast;
mod config;
mod http;
mod hub;
mod playlist;
mod rotation;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::http::{build_router, AppState};
use crate::hub::{Hub, HubHandle};
use crate::playlist::Playlist;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let version = env!("CARGO_PKG_VERSION").to_string();
    let config = Config::from_env()?;

    // Nothing to show without spirits; this is the one fatal startup error.
    let playlist = match Playlist::load(&config.data_path) {
        Ok(p) => p,
        Err(e) => {
            error!(path = %config.data_path.display(), "cannot load spirits: {e}");
            std::process::exit(1);
        }
    };
    info!(spirits = playlist.len(), "spirit playlist loaded");

    let (hub, handle) = Hub::init(playlist, config.hub);
    let hub_task = tokio::spawn(hub.run());

    let app = build_router(AppState {
        version,
        hub: handle.clone(),
        public_dir: config.public_dir.clone(),
    });

    let addr: SocketAddr = config.addr;
    info!("Spirit shrine engine starting on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(handle))
        .await?;

    hub_exited_cleanly(hub_task.await);
    Ok(())
}

/// Logs a dispatcher that died (panic or cancellation) instead of returning.
fn hub_exited_cleanly(joined: Result<(), tokio::task::JoinError>) -> bool {
    match joined {
        Ok(()) => true,
        Err(e) => {
            warn!("spirit hub task failed: {e}");
            false
        }
    }
}

async fn shutdown_signal(hub: HubHandle) {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok(); };

    #[cfg(unix)]
    let term = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = term => {},
    }

    warn!("Shutdown signal received.");
    // Open sockets would otherwise hold graceful shutdown forever.
    hub.teardown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_exit_reports_panicked_dispatcher() {
        let crashed = tokio::spawn(async { panic!("dispatcher blew up") });
        assert!(!hub_exited_cleanly(crashed.await));

        let finished = tokio::spawn(async {});
        assert!(hub_exited_cleanly(finished.await));
    }
}

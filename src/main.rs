mod config;
mod dispatch;
mod error;
mod handlers;
mod media;
mod normalize;
mod queue;
mod session;
mod types;

use std::sync::Arc;

use log::info;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use config::Config;
use handlers::AppState;
use queue::SendQueue;
use session::{BridgeClient, SessionState};

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                log::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutting down, cancelling in-flight batches");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    pretty_env_logger::init_timed();

    let config = Config::from_env()?;
    info!("Bridge: {}", config.bridge_url);
    info!(
        "Country code: +{}, uploads in {}",
        config.country_code,
        config.upload_dir.display()
    );

    let shutdown = CancellationToken::new();
    let bridge = Arc::new(BridgeClient::new(
        &config.bridge_url,
        config.bridge_token.clone(),
        config.send_timeout,
    )?);

    // The session is started once and shared by every request.
    let (session_tx, session_rx) = watch::channel(SessionState::Starting);
    let watcher = tokio::spawn(session::initialize(
        bridge.clone(),
        config.status_poll,
        session_tx,
        shutdown.clone(),
    ));

    let (queue, worker) = SendQueue::spawn(bridge, config.queue_capacity);

    let state = Arc::new(AppState {
        messenger: Arc::new(queue),
        country_code: config.country_code.clone(),
        upload_dir: config.upload_dir.clone(),
        session: session_rx,
        shutdown: shutdown.clone(),
    });

    let app = handlers::router(state, &config.public_dir, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!("Server running on http://localhost:{}", config.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // Router and state are gone, so the queue drains and its worker exits.
    shutdown.cancel();
    let _ = watcher.await;
    let _ = worker.await;
    info!("Stopped");

    Ok(())
}

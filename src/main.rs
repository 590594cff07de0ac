use std::sync::Arc;

use streamable_http_mcp::{build_app, config::Config, logging, tools::SampleTools, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;
    let state = AppState::new(&config, Arc::new(SampleTools::new()));

    if let Some(idle_timeout) = config.session_idle_timeout {
        let sessions = Arc::clone(state.router.sessions());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle_timeout.min(REAP_INTERVAL_CAP));
            loop {
                ticker.tick().await;
                if sessions.is_empty().await {
                    continue;
                }
                sessions.reap_idle().await;
            }
        });
    }

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        session_mode = %config.session_mode,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

const REAP_INTERVAL_CAP: std::time::Duration = std::time::Duration::from_secs(60);

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
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
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down");
}

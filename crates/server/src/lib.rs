use tokio::{net::TcpListener, signal};
use tracing::{error, info};

pub mod config;
pub mod deployment;
pub mod error;
pub mod routes;

pub use deployment::DeploymentImpl;

/// Serve the API on `listener` until Ctrl+C or SIGTERM.
pub async fn serve(deployment: DeploymentImpl, listener: TcpListener) -> std::io::Result<()> {
    let app = routes::router(deployment);

    if let Ok(address) = listener.local_addr() {
        info!(%address, "Server running");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
}

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoswarm::config::AutoswarmConfig;
use autoswarm::daemon;

/// Grace period the supervisor gives the periodic loop to finish its
/// in-flight cycle after a shutdown signal (§5).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let config = match AutoswarmConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("autoswarm={}", config.log_level.to_lowercase()).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        docker_host = %config.docker_host,
        traefik_network = %config.traefik_network,
        reconcile_interval_secs = config.reconcile_interval_secs,
        control_plane_enabled = config.control_plane_enabled(),
        "starting autoswarm"
    );

    let supervisor = match daemon::bootstrap(&config).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!(error = %err, "startup failed");
            std::process::exit(1);
        }
    };

    if !config.control_plane_enabled() {
        info!("AUTOSWARM_DOKPLOY_API_KEY unset; running in conversion-only mode");
    }

    supervisor.initial_sweep().await;

    let cancellation = CancellationToken::new();
    let event_loop = tokio::spawn(Arc::clone(&supervisor).run_event_loop(cancellation.clone()));
    let periodic_loop = tokio::spawn(Arc::clone(&supervisor).run_periodic_loop(cancellation.clone()));

    shutdown_signal().await;
    info!("shutdown signal received; cancelling event and periodic loops");
    cancellation.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = event_loop.await;
        let _ = periodic_loop.await;
    })
    .await
    .is_err()
    {
        error!("loops did not drain within the grace period; exiting anyway");
    }

    info!("shutdown complete");
}

/// Waits for SIGINT or SIGTERM (§6).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_listener::config::Config;
use webhook_listener::server::{AppState, build_router};

/// Receives GitHub webhooks and runs the configured commands.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "WEBHOOK_LISTENER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Port to listen on.
    #[arg(long, env = "WEBHOOK_LISTENER_PORT", default_value_t = 9000)]
    port: u16,

    /// Address to bind to.
    #[arg(long, env = "WEBHOOK_LISTENER_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webhook_listener=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %args.config.display(),
        repos = config.repos.len(),
        "Configuration loaded"
    );

    let app = build_router(AppState::new(config));

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!("Webhook listener started on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error");
        return ExitCode::FAILURE;
    }

    info!("Server shut down gracefully");
    ExitCode::SUCCESS
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
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

    info!("Shutdown signal received, draining in-flight deliveries");
}

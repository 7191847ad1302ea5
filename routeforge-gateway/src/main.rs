//! Binary entry point: parses arguments, loads and validates configuration,
//! initializes tracing, and starts the HTTP server until interrupted.

use std::net::SocketAddr;

use clap::Parser;
use routeforge_gateway::{config::Config, server::create_server};

#[derive(Parser)]
#[command(author, version, about = "Inference-routing gateway for multiple AI providers", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides `[server].port` from the configuration file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Overrides `[server].host` from the configuration file.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `[logging].level` from the configuration file.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}; falling back to defaults", args.config);
            Config::default()
        }
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }
    config.validate()?;

    init_tracing(&config.logging);

    let app = create_server(config.clone()).await?;

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "starting gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing(logging: &routeforge_gateway::config::LoggingConfig) {
    use routeforge_gateway::config::LogFormat;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight requests");
}

//! Sentinel: startup database checks and request performance sampling.
//!
//! This is the application entry point. It loads configuration from a TOML
//! file, initializes tracing, runs the startup tasks (database connectivity
//! test), sets up the Axum router with the monitor middleware, and starts
//! the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sentinel::config::{AppConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use sentinel::db::postgres::PgConnectorFactory;
use sentinel::db::ConnectorFactory;
use sentinel::lifecycle::{
    run_initialization, DatabaseConnectionTest, InitContext, InitializationTask,
};
use sentinel::monitor::HealthMonitor;
use sentinel::routes::create_router;
use sentinel::shutdown::shutdown_signal;
use sentinel::state::AppState;

/// Sentinel: startup database checks and request performance sampling
#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "sentinel=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration first: it selects the log format
    let config = AppConfig::load(&args.config)?;

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    if config.logging.is_json() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(
        config = %args.config,
        database_enabled = config.database.enabled,
        monitor_enabled = config.monitor.enabled,
        "Loaded configuration"
    );

    // Database connectors (pool connects lazily)
    let connectors: Arc<dyn ConnectorFactory> = Arc::new(PgConnectorFactory::new(&config.database)?);

    // Startup tasks must pass before any request is accepted
    let tasks: Vec<Box<dyn InitializationTask>> = vec![Box::new(DatabaseConnectionTest::new(
        config.initialization.clone(),
    ))];
    run_initialization(
        &tasks,
        &InitContext {
            connectors: connectors.as_ref(),
        },
    )
    .await?;
    tracing::info!("Initialization complete");

    // Create application state
    let monitor = Arc::new(HealthMonitor::new(&config.monitor));
    let state = AppState::new(config.clone(), connectors, monitor);

    // Create router
    let app = create_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

use usb_configdb::api::{self, AppState};
use usb_configdb::config::Config;
use usb_configdb::pool::PoolManager;
use usb_configdb::schema::{MigrationRunner, SeedRunner};
use usb_configdb::security::AdminAuthConfig;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from .env file if present
    let dotenv = dotenvy::dotenv();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "/var/log/usb-configdb".to_string());

    std::fs::create_dir_all(&log_dir).unwrap_or_else(|e| {
        eprintln!("Warning: Could not create log directory {}: {}", log_dir, e);
    });

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "usb-configdb.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Console plus JSON file output
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,usb_configdb=debug")),
        )
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    debug!("Logging initialized - log directory: {}", log_dir);

    if let Err(e) = dotenv {
        warn!("No .env file found or error loading it: {}", e);
    }

    let config = Config::from_env()?;
    let socket_addr = config.socket_addr()?;

    info!("Starting USB config database service on {}", socket_addr);
    info!("Schema: {}", config.db_schema);
    info!("Max connections: {}", config.max_connections);
    info!("Allowed admin networks: {:?}", config.allowed_admin_ips);
    info!("Trusted proxies: {:?}", config.trusted_proxies);

    let pool_manager = Arc::new(PoolManager::new(&config).await?);

    // Bring the schema up to date before serving
    let mut migrations = MigrationRunner::new();
    if let Some(dir) = &config.migrations_dir {
        migrations = migrations.with_directory(dir)?;
    }
    let applied = migrations.run_migrations(&pool_manager).await?;
    info!("Startup migrations: {} applied", applied);

    let seeder = match &config.seed_file {
        Some(path) => SeedRunner::from_file(path)?,
        None => SeedRunner::new(),
    };
    let seeded = seeder.run_seed_if_empty(&pool_manager).await?;
    if !seeded.skipped {
        info!("Seeded default configuration: {} rows", seeded.rows_inserted);
    }

    let auth = Arc::new(
        AdminAuthConfig::new(config.admin_token.clone(), config.allowed_admin_ips.clone())
            .with_trusted_proxies(config.trusted_proxies.clone()),
    );
    if !auth.is_enabled() {
        warn!("ADMIN_TOKEN not set: admin routes will answer 503");
    }

    let state = Arc::new(AppState::new(
        pool_manager.clone(),
        config.migrations_dir.clone(),
        config.seed_file.clone(),
    ));

    let app = api::router(state, auth);

    let listener = tokio::net::TcpListener::bind(&socket_addr).await?;
    info!("Server listening on {}", socket_addr);

    // Run server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool_manager.pool().close();
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}

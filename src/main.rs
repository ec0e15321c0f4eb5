use std::{process, sync::Arc};

use clap::Parser;
use fpmwatch::{
    cli::Cli,
    config::Config,
    core::{exporter::Exporter, scrape::targets::TargetRegistry, transport::FastCgiTransport},
    logger::LoggerManager,
    print_error,
    web::{self, AppState},
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::resolve(cli.config.as_deref()).unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    cli.apply(&mut config);
    config.check().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });
    config
}

fn log_targets_table(registry: &TargetRegistry) {
    let socket_width = registry
        .targets()
        .iter()
        .map(|t| t.socket.len())
        .max()
        .unwrap_or(0)
        .max("Socket".len());

    let header = format!("{:<width$} | {:<6} | Path", "Socket", "Mode", width = socket_width);
    let sep = format!("{}-+-{}-+-{}", "-".repeat(socket_width), "-".repeat(6), "-".repeat(12));

    info!("{}", header);
    info!("{}", sep);
    for target in registry.targets() {
        info!(
            "{:<width$} | {:<6} | {}",
            target.socket,
            target.mode_name(),
            target.path(),
            width = socket_width
        );
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cfg = load_config(&cli);

    let logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting fpmwatch version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.phpfpm);

    let transport = Arc::new(FastCgiTransport::new(cfg.phpfpm.timeout()));
    let exporter = Exporter::from_config(transport, &cfg.phpfpm);
    if exporter.registry().is_empty() {
        warn!("No scrape targets: status path is disabled and no script paths are configured");
    } else {
        log_targets_table(exporter.registry());
    }

    let router = web::create_router(AppState {
        exporter: Arc::new(exporter),
        telemetry_path: cfg.web.telemetry_path.clone(),
    });

    let address = cfg.web.socket_addr().unwrap_or_else(|e| {
        print_error!("Invalid listen address {}: {}", cfg.web.listen_address, e);
        process::exit(1);
    });
    let listener = TcpListener::bind(address).await.unwrap_or_else(|e| {
        print_error!("Failed to bind {}: {}", address, e);
        process::exit(1);
    });
    info!("Metrics exposed at {}", cfg.web.telemetry_path);

    web::serve(listener, router, shutdown_signal()).await?;
    info!("Shutdown complete");
    Ok(())
}

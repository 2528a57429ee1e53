//! nmap-gateway - Safe, bounded gateway to the nmap scanner
//!
//! Main entry point. Loads configuration, initializes logging, resolves the
//! engine once and then serves tool calls or runs a single command.
//!
//! Licensed under the MIT License (https://opensource.org/licenses/MIT)

use anyhow::Result;
use clap::Parser;
use nmap_gateway::{
    cli::{Cli, Command},
    config::AppConfig,
    core::{ScanRequest, ServiceIdentity, SessionId},
    engine::EngineSettings,
    logging,
    mcp::{McpHandler, McpServer},
    service::ScanService,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate().map_err(anyhow::Error::msg)?;

    let mut config = AppConfig::load(&cli.config_path)?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // Held until exit so the log file is flushed
    let _log_guard = logging::init_logging_with_config(&config.logging)?;

    info!("Starting nmap-gateway v{}", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(EngineSettings::resolve(&config));
    let service = ScanService::new(engine).with_identity(ServiceIdentity {
        name: config.server.name.clone(),
        version: config.server.version.clone(),
    });
    let session = SessionId::from(cli.session.clone());

    tokio::select! {
        result = run(cli.command(), service, session) => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received, exiting");
            std::process::exit(0);
        }
    }
}

async fn run(command: Command, service: ScanService, session: SessionId) -> Result<()> {
    match command {
        Command::Serve => {
            let server = McpServer::new(McpHandler::new(service, session));
            server.run_stdio().await?;
        }
        Command::Scan {
            target,
            flags,
            format,
        } => {
            let mut request = ScanRequest::new(target).with_format(format.into());
            request.flags = flags;
            let response = service.handle(request, &session).await;
            println!("{}", response.as_text());
        }
        Command::Info => {
            println!("{}", service.info(&session).as_text());
        }
    }

    info!("nmap-gateway finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
}

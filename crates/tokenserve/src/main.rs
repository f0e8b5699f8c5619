use fileserver::{
    load_tls, CapabilityToken, FileServerApi, Handle, ServerConfig, ServerState, TransferLog,
};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grace period for in-flight transfers once a shutdown signal arrives
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("SERVE_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = match ServerConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Unexpected error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> fileserver::Result<()> {
    let addr = config.listen_addr()?;
    let tls = load_tls(&config.certfile, &config.keyfile).await?;
    let transfer_log = TransferLog::open(&config.database).await?;

    let token = CapabilityToken::generate();
    let share_url = config.share_url(&token);
    let state = ServerState::from_config(&config, token, transfer_log.clone());

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    println!("Server will start at {}:{}.", config.url(), config.port());
    println!("{}", share_url);

    let served = FileServerApi::new(state).serve_tls(addr, tls, handle).await;

    // Runs on every exit path of the server; close is idempotent
    if let Err(e) = transfer_log.close().await {
        tracing::error!("Failed to close transfer log: {}", e);
    }
    println!("Server stopped.");

    served
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }

    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

// =============================================================================
// Matrixon Matrix NextServer - Server Binary
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// =============================================================================

mod clap;

use std::{net::SocketAddr, process::ExitCode, sync::Arc, time::Instant};

use matrixon_stream::{
    api,
    database::MemoryDatabase,
    service::{federation::keyring::KeyRing, Services},
    Config, Result,
};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let args = clap::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "It looks like your config is invalid. The following error occurred: {e}"
            );
            return ExitCode::FAILURE;
        }
    };
    if let Some(log) = args.log_level {
        config.log = log;
    }

    let filter_layer = match EnvFilter::try_new(&config.log) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("It looks like your log config is invalid. The following error occurred: {e}");
            EnvFilter::new("warn")
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run_server(config).await {
        error!("❌ Server stopped with an error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_server(config: Config) -> Result<()> {
    let start = Instant::now();
    info!("🚀 Starting Matrixon stream server for {}", config.server_name);

    let db = Arc::new(MemoryDatabase::new());
    for (server_name, key_id, public_key, valid_until_ts) in config.trusted_keys()? {
        db.add_signing_key(&server_name, &key_id, public_key, valid_until_ts);
    }
    if config.federation.allow_federation && config.federation.trusted_keys.is_empty() {
        warn!("⚠️ Federation is enabled but no remote keys are pinned, every send_join will be rejected");
    }

    let addr = SocketAddr::from((config.address, config.port));
    let keyring: Arc<dyn KeyRing> = db.clone();
    let services = Services::build(db, keyring, config)?;

    let listener = TcpListener::bind(addr).await?;
    info!("🚀 Listening on {} (ready in {:?})", addr, start.elapsed());

    axum::serve(listener, api::router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("❌ Failed to listen for the shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    warn!("🛑 Received shutdown signal, finishing in-flight requests");
}

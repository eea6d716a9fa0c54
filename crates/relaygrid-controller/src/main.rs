mod chain;
mod config;
mod db;
mod error;
mod evidence;
mod executor;
mod forwarder;
mod handler;
mod registry;
mod server;
#[cfg(test)]
mod testutil;
mod transfer;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaygrid_controller=info".parse().unwrap()),
        )
        .init();

    let config = config::Config::parse();

    tracing::info!(
        instance = %config.local_instance,
        db = %config.db_url,
        "[NC] network controller starting",
    );

    let db: Arc<dyn db::Db> = Arc::new(db::HttpDb::new(&config.db_url));
    let store = Arc::new(evidence::FileEvidenceStore::new(config.evidence_dir.clone()));

    let worker = transfer::TransferWorker::new(db.clone(), store);
    if config.no_transfer_worker {
        tracing::info!("[ET] evidence transfer worker disabled");
    } else {
        worker.send_cached();
        worker.start();
    }

    let state = server::AppState {
        db,
        http: server::outbound_client(),
        local_instance: config.local_instance.clone(),
    };
    server::serve(state, config.listen_addr, shutdown_signal()).await?;

    worker
        .shutdown(Duration::from_secs(config.shutdown_grace_secs))
        .await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("[NC] cannot listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("[NC] shutdown signal received");
}

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "relaygrid-controller", about = "relaygrid network controller")]
pub struct Config {
    /// HTTP listen address for peer POSTs and DB-local PUSHes.
    #[arg(long, env = "RG_LISTEN_ADDR", default_value = "0.0.0.0:4444")]
    pub listen_addr: SocketAddr,

    /// Base URL of the upstream metadata store.
    #[arg(long, env = "RG_DB_URL", default_value = "http://127.0.0.1:4449")]
    pub db_url: String,

    /// This node's identity. The anonymizer record whose `instance` matches
    /// marks the head of the local forwarding chain.
    #[arg(long, env = "RG_LOCAL_INSTANCE")]
    pub local_instance: String,

    /// Root directory of the local evidence cache.
    #[arg(long, env = "RG_EVIDENCE_DIR", default_value = "evidence")]
    pub evidence_dir: PathBuf,

    /// Serve controller traffic only; do not start the evidence transfer
    /// worker.
    #[arg(long, default_value = "false")]
    pub no_transfer_worker: bool,

    /// Seconds to wait for in-flight evidence dispatches on shutdown.
    #[arg(long, default_value = "30")]
    pub shutdown_grace_secs: u64,
}

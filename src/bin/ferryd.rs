use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::Ordering;
use tracing::info;

use ferry::cli::DaemonOpts;
use ferry::logging::init_logging;
use ferry::server::Server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_logging(opts.verbose.max(2), opts.log_file.as_deref())?;
    let cfg = opts.resolve()?;

    let server = Server::bind(&cfg.server)?;

    println!("Starting Ferry daemon:");
    println!("  Root: {}", server.root().display());
    println!("  Bind: {}", server.local_addr()?);
    println!("  Chunk size: {} bytes", cfg.server.chunk_size);

    // Security warning for 0.0.0.0 binding
    if cfg.server.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: Binding to 0.0.0.0 exposes the daemon to all network interfaces");
        eprintln!("   The protocol is UNENCRYPTED and UNAUTHENTICATED; use on trusted networks only");
    }

    // SIGINT and SIGTERM: stop accepting, let sessions wind down
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("termination requested, no longer accepting connections");
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("Error setting signal handler")?;

    server.serve()
}

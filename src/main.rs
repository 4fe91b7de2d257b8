//! ferry - send files and directory trees to a ferry daemon
//!
//! Loose files go first, then each directory tree depth-first. The process
//! exits nonzero when the connection fails or any file could not be delivered.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use ferry::cli::ClientOpts;
use ferry::client::{Connection, Orchestrator};
use ferry::fs_enum::{collect_sources, FileFilter};
use ferry::logger::{Logger, Tee, TextLogger};
use ferry::logging::init_logging;
use ferry::progress::ProgressLogger;

fn main() {
    std::process::exit(match run() {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("ferry: {:#}", e);
            2
        }
    });
}

fn run() -> Result<bool> {
    // The daemon deletes the partial file once the socket drops
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let opts = ClientOpts::parse();
    init_logging(opts.verbose, None)?;
    let cfg = opts.resolve()?;

    let filter = FileFilter {
        exclude_files: opts.exclude_files.clone(),
        exclude_dirs: opts.exclude_dirs.clone(),
    };
    let mut sources = collect_sources(&opts.sources, &filter)?;
    info!(
        files = sources.file_count(),
        directories = sources.directories.len(),
        "collected sources"
    );

    let mut loggers: Vec<Box<dyn Logger>> = Vec::new();
    if !opts.quiet {
        loggers.push(Box::new(ProgressLogger::new(
            sources.total_bytes(),
            opts.verbose > 0,
        )));
    }
    if let Some(path) = &opts.log_file {
        loggers.push(Box::new(
            TextLogger::new(path)
                .with_context(|| format!("opening log file {}", path.display()))?,
        ));
    }

    let addr = cfg.client.address();
    let connection = Connection::connect(&addr, cfg.client.reply_timeout())
        .with_context(|| format!("connect {}", addr))?;
    let mut orchestrator = Orchestrator::connect(connection)
        .context("waiting for chunk size announcement")?
        .with_policy(cfg.client.retry_policy())
        .with_logger(Arc::new(Tee(loggers)));
    info!(%addr, chunk_size = orchestrator.chunk_size(), "connected");

    let report = orchestrator.run(&mut sources)?;

    println!(
        "Sent {} files ({} bytes)",
        report.files_sent, report.bytes_sent
    );
    for name in &report.failed {
        println!("  failed: {}", name);
    }
    for name in &report.skipped_directories {
        println!("  skipped directory: {}", name);
    }
    for name in &report.unclosed_directories {
        println!("  directory not closed: {}", name);
    }
    Ok(report.is_success())
}

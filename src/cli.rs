//! Command-line options for both binaries

use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::Config;

/// Daemon options for ferryd
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Ferry daemon - receives files over a single TCP connection")]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Root directory incoming files are written under
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Chunk size in bytes announced to clients
    #[arg(long)]
    pub chunk_size: Option<u32>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log verbosity; info unless raised (-vvv debug, -vvvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also write diagnostics to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl DaemonOpts {
    /// Configuration file values with command-line overrides applied
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut cfg = Config::load_or_default(self.config.as_deref())?;
        if let Some(bind) = &self.bind {
            cfg.server.bind = bind.clone();
        }
        if let Some(root) = &self.root {
            cfg.server.root = root.clone();
        }
        if let Some(size) = self.chunk_size {
            cfg.server.chunk_size = size;
        }
        Ok(cfg)
    }
}

/// Client options for ferry
#[derive(Clone, Debug, Parser)]
#[command(author, version, about = "Ferry - send files and directory trees to a ferry daemon")]
pub struct ClientOpts {
    /// Files and directories to send
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Seconds to wait for any single server reply
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Exclude files matching patterns
    #[arg(long = "xf", action = ArgAction::Append)]
    pub exclude_files: Vec<String>,

    /// Exclude directories matching patterns
    #[arg(long = "xd", action = ArgAction::Append)]
    pub exclude_dirs: Vec<String>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v warn, -vv info, -vvv debug, -vvvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Append transfer events to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,
}

impl ClientOpts {
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut cfg = Config::load_or_default(self.config.as_deref())?;
        if let Some(host) = &self.host {
            cfg.client.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.client.port = port;
        }
        if let Some(secs) = self.timeout {
            cfg.client.reply_timeout_ms = secs.saturating_mul(1000);
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_overrides() {
        let opts = DaemonOpts::parse_from(["ferryd", "--bind", "127.0.0.1:9", "--chunk-size", "64", "-vv"]);
        assert_eq!(opts.verbose, 2);
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:9");
        assert_eq!(cfg.server.chunk_size, 64);
        assert_eq!(cfg.server.root, PathBuf::from("."));
    }

    #[test]
    fn test_client_overrides() {
        let opts = ClientOpts::parse_from([
            "ferry", "a.txt", "dir", "--host", "10.0.0.2", "-p", "4000", "--timeout", "3", "--xf", "*.tmp",
        ]);
        assert_eq!(opts.sources, vec![PathBuf::from("a.txt"), PathBuf::from("dir")]);
        assert_eq!(opts.exclude_files, vec!["*.tmp".to_string()]);
        let cfg = opts.resolve().unwrap();
        assert_eq!(cfg.client.address(), "10.0.0.2:4000");
        assert_eq!(cfg.client.reply_timeout_ms, 3000);
    }

    #[test]
    fn test_client_requires_sources() {
        assert!(ClientOpts::try_parse_from(["ferry"]).is_err());
    }
}

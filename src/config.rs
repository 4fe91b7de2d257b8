//! Configuration file support
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:1234"
//! root = "/srv/incoming"
//! chunk_size = 15000
//!
//! [client]
//! host = "127.0.0.1"
//! port = 1234
//! reply_timeout_ms = 30000
//! chunk_attempts = 5
//! read_attempts = 3
//! file_attempts = 3
//! ```
//!
//! Every key is optional. Command-line flags override the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::RetryPolicy;
use crate::protocol::{retry, timeouts, DEFAULT_BIND, DEFAULT_CHUNK_SIZE, DEFAULT_PORT, MAX_CHUNK_SIZE};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
    pub root: PathBuf,
    /// Announced to every client; bytes per chunk
    pub chunk_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            root: PathBuf::from("."),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            bail!(
                "chunk_size must be between 1 and {} bytes, got {}",
                MAX_CHUNK_SIZE,
                self.chunk_size
            );
        }
        if !self.root.exists() {
            bail!("root directory does not exist: {}", self.root.display());
        }
        if !self.root.is_dir() {
            bail!("root path is not a directory: {}", self.root.display());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub reply_timeout_ms: u64,
    pub chunk_attempts: u32,
    pub read_attempts: u32,
    pub file_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            reply_timeout_ms: timeouts::REPLY_MS,
            chunk_attempts: retry::CHUNK_ATTEMPTS,
            read_attempts: retry::READ_ATTEMPTS,
            file_attempts: retry::FILE_ATTEMPTS,
        }
    }
}

impl ClientConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            chunk_attempts: self.chunk_attempts.max(1),
            read_attempts: self.read_attempts.max(1),
            file_attempts: self.file_attempts.max(1),
        }
    }
}

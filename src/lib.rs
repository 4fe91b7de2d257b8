//! Ferry library
//!
//! Chunked, checksummed transfer of files and directory trees from a client to
//! a server over one TCP connection.

pub mod checksum;
pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod reassembly;
pub mod server;
pub mod session;
pub mod transfer;

pub use error::{Error, ProtocolError, Result};

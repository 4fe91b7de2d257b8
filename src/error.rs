//! Error types shared by the codec, the client orchestrator and the server session.

use std::path::PathBuf;

/// Structural violations found while framing or decoding a packet.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("unknown {direction} opcode {opcode}")]
    UnknownOpcode { direction: Direction, opcode: u8 },

    #[error("frame payload too large: {0} bytes (max: {max})", max = crate::protocol::MAX_FRAME_SIZE)]
    FrameTooLarge(usize),
}

impl ProtocolError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPacket(msg.into())
    }
}

/// Which opcode table a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("client->server"),
            Direction::ServerToClient => f.write_str("server->client"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection error: {0}")]
    Connection(#[source] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("timed out waiting for reply")]
    Timeout,

    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },

    #[error("chunk sequence violation: expected {expected}, got {got}")]
    ChunkSequenceViolation { expected: u64, got: u64 },

    #[error("checksum mismatch for {name}")]
    ChecksumMismatch { name: String },

    #[error("a transfer is already in progress: {0}")]
    DuplicateTransferInProgress(String),

    #[error("no transfer in progress")]
    NoTransferInProgress,

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("directory stack underflow")]
    DirectoryStackUnderflow,

    #[error("failed to read {}: {source}", .path.display())]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server rejected abort of {0}")]
    AbortRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = Error::ChunkSequenceViolation { expected: 2, got: 5 };
        assert_eq!(e.to_string(), "chunk sequence violation: expected 2, got 5");
        let e = ProtocolError::UnknownOpcode {
            direction: Direction::ServerToClient,
            opcode: 7,
        };
        assert_eq!(e.to_string(), "unknown server->client opcode 7");
    }
}

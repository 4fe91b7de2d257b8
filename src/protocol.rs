//! Shared protocol constants for the Ferry framed transport

// Frame header: opcode (1) | payload length (4, little-endian)
pub const HEADER_LEN: usize = 5;

// Maximum frame payload size (64MB) - prevents DoS via memory exhaustion
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// Chunks travel hex-encoded inside a JSON object, so a chunk may use at most
// a quarter of the frame budget.
pub const MAX_CHUNK_SIZE: u32 = (MAX_FRAME_SIZE / 4) as u32;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_BIND: &str = "0.0.0.0:1234";
pub const DEFAULT_CHUNK_SIZE: u32 = 15_000;

// Client -> server opcodes. Same integers as `server_op`, different meaning.
pub mod client_op {
    pub const CREATE_DIRECTORY: u8 = 1;
    pub const CREATE_FILE: u8 = 2;
    pub const FILE_CHUNK: u8 = 3;
    pub const END_OF_FILE: u8 = 4;
    pub const END_OF_DIRECTORY: u8 = 5;
    pub const ABORT_TRANSFER: u8 = 6;
}

// Server -> client opcodes
pub mod server_op {
    pub const CHUNK_SIZE: u8 = 1;
    pub const CONFIRMATION: u8 = 2;
    pub const CHUNK_INTEGRITY: u8 = 3;
    pub const FILE_INTEGRITY: u8 = 4;
}

// Retry ceilings used by the client orchestrator
pub mod retry {
    // Sends of one chunk before the file is aborted
    pub const CHUNK_ATTEMPTS: u32 = 5;
    // Local read failures tolerated per file transfer
    pub const READ_ATTEMPTS: u32 = 3;
    // Whole-file restarts after a negative file integrity confirmation
    pub const FILE_ATTEMPTS: u32 = 3;
}

pub mod timeouts {
    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // How long the client waits for any single reply (ms). The server
    // re-hashes the whole file before answering end-of-file, so this is generous.
    pub const REPLY_MS: u64 = 30_000;

    // Server session read timeout; sessions check the shutdown flag this often (ms)
    pub const SESSION_POLL_MS: u64 = 500;

    // Accept loop idle sleep (ms)
    pub const ACCEPT_POLL_MS: u64 = 50;
}

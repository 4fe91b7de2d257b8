//! Wire codec: framed packets and the two typed message sets.
//!
//! Every message is `opcode (1) | length (4, LE) | payload`. Client and server
//! use separate opcode tables, modelled as [`ClientMessage`] and
//! [`ServerMessage`]; the same integer never crosses between them.
//!
//! Payload shapes:
//! - names (create/end directory, end of file, abort): raw UTF-8
//! - file creation and chunks: JSON objects, chunk bytes hex-encoded
//! - confirmations: one byte, nonzero = true
//! - chunk size announcement: u32, little-endian

use serde::{Deserialize, Serialize};

use crate::error::{Direction, ProtocolError};
use crate::protocol::{client_op, server_op, HEADER_LEN};
use crate::protocol_core::{build_frame_header, parse_frame_header, validate_frame_size};

/// One complete framed message; `payload.len()` is always the declared length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Self { opcode, payload }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&build_frame_header(self.opcode, self.payload.len() as u32));
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode exactly one frame. `frame` must hold the header and the whole
    /// payload, nothing more.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        let (opcode, len) = parse_frame_header(frame)
            .ok_or_else(|| ProtocolError::malformed("frame shorter than header"))?;
        let len = len as usize;
        validate_frame_size(len)?;
        if frame.len() - HEADER_LEN != len {
            return Err(ProtocolError::malformed(format!(
                "declared length {} but frame carries {} payload bytes",
                len,
                frame.len() - HEADER_LEN
            )));
        }
        Ok(Self {
            opcode,
            payload: frame[HEADER_LEN..].to_vec(),
        })
    }
}

/// Metadata announced before the first chunk of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub chunk_size: u32,
    pub checksum: String,
}

/// One numbered slice of a file. `data` holds the decoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub file_name: String,
    pub number: u64,
    pub data: Vec<u8>,
    pub checksum: String,
}

#[derive(Serialize, Deserialize)]
struct ChunkWire {
    file_name: String,
    chunk_number: u64,
    chunk_size: usize,
    chunk_data: String,
    chunk_checksum: String,
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    CreateDirectory(String),
    CreateFile(FileHeader),
    FileChunk(FileChunk),
    EndOfFile(String),
    EndOfDirectory(String),
    AbortTransfer(String),
}

impl ClientMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ClientMessage::CreateDirectory(_) => client_op::CREATE_DIRECTORY,
            ClientMessage::CreateFile(_) => client_op::CREATE_FILE,
            ClientMessage::FileChunk(_) => client_op::FILE_CHUNK,
            ClientMessage::EndOfFile(_) => client_op::END_OF_FILE,
            ClientMessage::EndOfDirectory(_) => client_op::END_OF_DIRECTORY,
            ClientMessage::AbortTransfer(_) => client_op::ABORT_TRANSFER,
        }
    }

    pub fn to_packet(&self) -> Packet {
        let payload = match self {
            ClientMessage::CreateDirectory(name)
            | ClientMessage::EndOfFile(name)
            | ClientMessage::EndOfDirectory(name)
            | ClientMessage::AbortTransfer(name) => name.as_bytes().to_vec(),
            // Serializing plain structs of strings and integers cannot fail
            ClientMessage::CreateFile(header) => serde_json::to_vec(header).unwrap_or_default(),
            ClientMessage::FileChunk(chunk) => {
                let wire = ChunkWire {
                    file_name: chunk.file_name.clone(),
                    chunk_number: chunk.number,
                    chunk_size: chunk.data.len(),
                    chunk_data: hex::encode(&chunk.data),
                    chunk_checksum: chunk.checksum.clone(),
                };
                serde_json::to_vec(&wire).unwrap_or_default()
            }
        };
        Packet::new(self.opcode(), payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_packet().encode()
    }

    /// Decode a client packet. Nothing is applied until the whole payload parsed.
    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        match packet.opcode {
            client_op::CREATE_DIRECTORY => Ok(Self::CreateDirectory(decode_name(&packet.payload)?)),
            client_op::CREATE_FILE => {
                let header: FileHeader = serde_json::from_slice(&packet.payload)
                    .map_err(|e| ProtocolError::malformed(format!("file header: {}", e)))?;
                Ok(Self::CreateFile(header))
            }
            client_op::FILE_CHUNK => {
                let wire: ChunkWire = serde_json::from_slice(&packet.payload)
                    .map_err(|e| ProtocolError::malformed(format!("file chunk: {}", e)))?;
                let data = hex::decode(&wire.chunk_data)
                    .map_err(|e| ProtocolError::malformed(format!("chunk data: {}", e)))?;
                if data.len() != wire.chunk_size {
                    return Err(ProtocolError::malformed(format!(
                        "chunk declares {} bytes but carries {}",
                        wire.chunk_size,
                        data.len()
                    )));
                }
                Ok(Self::FileChunk(FileChunk {
                    file_name: wire.file_name,
                    number: wire.chunk_number,
                    data,
                    checksum: wire.chunk_checksum,
                }))
            }
            client_op::END_OF_FILE => Ok(Self::EndOfFile(decode_name(&packet.payload)?)),
            client_op::END_OF_DIRECTORY => Ok(Self::EndOfDirectory(decode_name(&packet.payload)?)),
            client_op::ABORT_TRANSFER => Ok(Self::AbortTransfer(decode_name(&packet.payload)?)),
            other => Err(ProtocolError::UnknownOpcode {
                direction: Direction::ClientToServer,
                opcode: other,
            }),
        }
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMessage {
    ChunkSize(u32),
    Confirmation(bool),
    ChunkIntegrity(bool),
    FileIntegrity(bool),
}

impl ServerMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ServerMessage::ChunkSize(_) => server_op::CHUNK_SIZE,
            ServerMessage::Confirmation(_) => server_op::CONFIRMATION,
            ServerMessage::ChunkIntegrity(_) => server_op::CHUNK_INTEGRITY,
            ServerMessage::FileIntegrity(_) => server_op::FILE_INTEGRITY,
        }
    }

    pub fn to_packet(&self) -> Packet {
        let payload = match *self {
            ServerMessage::ChunkSize(size) => size.to_le_bytes().to_vec(),
            ServerMessage::Confirmation(ok)
            | ServerMessage::ChunkIntegrity(ok)
            | ServerMessage::FileIntegrity(ok) => vec![ok as u8],
        };
        Packet::new(self.opcode(), payload)
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_packet().encode()
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtocolError> {
        match packet.opcode {
            server_op::CHUNK_SIZE => {
                let bytes: [u8; 4] = packet.payload.as_slice().try_into().map_err(|_| {
                    ProtocolError::malformed(format!(
                        "chunk size payload must be 4 bytes, got {}",
                        packet.payload.len()
                    ))
                })?;
                Ok(Self::ChunkSize(u32::from_le_bytes(bytes)))
            }
            server_op::CONFIRMATION => Ok(Self::Confirmation(decode_bool(&packet.payload)?)),
            server_op::CHUNK_INTEGRITY => Ok(Self::ChunkIntegrity(decode_bool(&packet.payload)?)),
            server_op::FILE_INTEGRITY => Ok(Self::FileIntegrity(decode_bool(&packet.payload)?)),
            other => Err(ProtocolError::UnknownOpcode {
                direction: Direction::ServerToClient,
                opcode: other,
            }),
        }
    }

    /// Short label used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::ChunkSize(_) => "chunk size",
            ServerMessage::Confirmation(_) => "confirmation",
            ServerMessage::ChunkIntegrity(_) => "chunk integrity",
            ServerMessage::FileIntegrity(_) => "file integrity",
        }
    }
}

fn decode_name(payload: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(payload.to_vec())
        .map_err(|_| ProtocolError::malformed("name is not valid UTF-8"))
}

fn decode_bool(payload: &[u8]) -> Result<bool, ProtocolError> {
    match payload {
        [b] => Ok(*b != 0),
        _ => Err(ProtocolError::malformed(format!(
            "boolean payload must be 1 byte, got {}",
            payload.len()
        ))),
    }
}

//! Per-connection server state and packet dispatch.
//!
//! A [`Session`] owns the reassembler for its socket, the directory stack and
//! at most one in-flight [`IncomingFile`]. Packets are handled one at a time in
//! arrival order; each returns the replies to write back.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::codec::{ClientMessage, FileChunk, FileHeader, Packet, ServerMessage};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol_core::validate_name;
use crate::reassembly::StreamReassembler;
use crate::transfer::{remove_if_exists, IncomingFile};

/// The directory scope incoming files land in, relative to a fixed base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStack {
    base: PathBuf,
    segments: Vec<String>,
}

impl DirectoryStack {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            segments: Vec::new(),
        }
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn top(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Where new files and directories are created.
    pub fn current(&self) -> PathBuf {
        let mut path = self.base.clone();
        path.extend(&self.segments);
        path
    }

    /// Create `name` under the current directory on disk and enter it.
    /// An existing directory is reused.
    pub fn push(&mut self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let path = self.current().join(name);
        if !path.is_dir() {
            std::fs::create_dir(&path)?;
        }
        self.segments.push(name.to_string());
        Ok(path)
    }

    /// Leave the innermost directory; the base itself can never be popped.
    pub fn pop(&mut self) -> Result<String> {
        self.segments.pop().ok_or(Error::DirectoryStackUnderflow)
    }
}

pub struct Session {
    dirs: DirectoryStack,
    current: Option<IncomingFile>,
    chunk_size: u32,
    reassembler: StreamReassembler,
}

impl Session {
    pub fn new(root: impl Into<PathBuf>, chunk_size: u32) -> Self {
        Self {
            dirs: DirectoryStack::new(root),
            current: None,
            chunk_size,
            reassembler: StreamReassembler::new(),
        }
    }

    /// First message on every connection.
    pub fn greeting(&self) -> ServerMessage {
        ServerMessage::ChunkSize(self.chunk_size)
    }

    pub fn directories(&self) -> &DirectoryStack {
        &self.dirs
    }

    pub fn current_file(&self) -> Option<&IncomingFile> {
        self.current.as_ref()
    }

    /// True when nothing is mid-flight: no open file, no partial packet.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.reassembler.is_idle()
    }

    /// Feed one raw socket read. Returns the replies for every packet it
    /// completed. `Err` means the connection must be closed.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Vec<ServerMessage>> {
        let packets = self.reassembler.feed(bytes)?;
        let mut replies = Vec::new();
        for packet in packets {
            replies.extend(self.on_packet(&packet)?);
        }
        Ok(replies)
    }

    /// Decode and dispatch one packet. Unknown opcodes are dropped; malformed
    /// payloads are fatal.
    pub fn on_packet(&mut self, packet: &Packet) -> Result<Vec<ServerMessage>> {
        match ClientMessage::decode(packet) {
            Ok(msg) => Ok(self.dispatch(msg)),
            Err(ProtocolError::UnknownOpcode { opcode, .. }) => {
                warn!(opcode, len = packet.payload.len(), "discarding packet with unknown opcode");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn dispatch(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::CreateDirectory(name) => vec![self.create_directory(&name)],
            ClientMessage::CreateFile(header) => vec![self.create_file(&header)],
            ClientMessage::FileChunk(chunk) => vec![self.receive_chunk(&chunk)],
            ClientMessage::EndOfFile(name) => self.end_of_file(&name),
            ClientMessage::EndOfDirectory(name) => vec![self.end_of_directory(&name)],
            ClientMessage::AbortTransfer(name) => vec![self.abort(&name)],
        }
    }

    fn create_directory(&mut self, name: &str) -> ServerMessage {
        match self.dirs.push(name) {
            Ok(path) => {
                debug!(dir = %path.display(), depth = self.dirs.depth(), "entered directory");
                ServerMessage::Confirmation(true)
            }
            Err(e) => {
                warn!(dir = name, error = %e, "cannot create directory");
                ServerMessage::Confirmation(false)
            }
        }
    }

    fn end_of_directory(&mut self, name: &str) -> ServerMessage {
        if self.dirs.top() != Some(name) {
            let e = if self.dirs.depth() == 0 {
                Error::DirectoryStackUnderflow
            } else {
                Error::InvalidName(name.to_string())
            };
            warn!(dir = name, open = ?self.dirs.top(), error = %e, "rejecting end of directory");
            return ServerMessage::Confirmation(false);
        }
        match self.dirs.pop() {
            Ok(_) => ServerMessage::Confirmation(true),
            Err(e) => {
                warn!(dir = name, error = %e, "rejecting end of directory");
                ServerMessage::Confirmation(false)
            }
        }
    }

    fn create_file(&mut self, header: &FileHeader) -> ServerMessage {
        match self.register_file(header) {
            Ok(()) => ServerMessage::Confirmation(true),
            Err(e) => {
                warn!(file = %header.name, error = %e, "rejecting file");
                ServerMessage::Confirmation(false)
            }
        }
    }

    fn register_file(&mut self, header: &FileHeader) -> Result<()> {
        if let Some(current) = &self.current {
            return Err(Error::DuplicateTransferInProgress(current.name().to_string()));
        }
        validate_name(&header.name)?;
        let path = self.dirs.current().join(&header.name);
        let file = IncomingFile::create(path, header)?;
        debug!(file = %file.path().display(), size = header.size, "receiving file");
        self.current = Some(file);
        Ok(())
    }

    /// Sequence problems answer with a plain negative confirmation, checksum
    /// problems with a negative chunk integrity confirmation. A failed write
    /// drops the file and answers like a sequence problem, so the client aborts.
    fn receive_chunk(&mut self, chunk: &FileChunk) -> ServerMessage {
        let result = match self.current.as_mut() {
            Some(file) if file.name() == chunk.file_name => file.write_chunk(chunk),
            Some(_) => Err(Error::InvalidName(chunk.file_name.clone())),
            None => Err(Error::NoTransferInProgress),
        };
        match result {
            Ok(()) => ServerMessage::ChunkIntegrity(true),
            Err(e @ Error::ChecksumMismatch { .. }) => {
                debug!(error = %e, "chunk failed integrity check");
                ServerMessage::ChunkIntegrity(false)
            }
            Err(e @ Error::Io(_)) => {
                // Part of the chunk may be on disk; the file cannot be resumed
                warn!(file = %chunk.file_name, error = %e, "chunk write failed, dropping file");
                if let Some(file) = self.current.take() {
                    if let Err(e) = file.discard() {
                        warn!(file = %chunk.file_name, error = %e, "cannot remove partial file");
                    }
                }
                ServerMessage::Confirmation(false)
            }
            Err(e) => {
                warn!(file = %chunk.file_name, chunk = chunk.number, error = %e, "rejecting chunk");
                ServerMessage::Confirmation(false)
            }
        }
    }

    /// Acknowledge receipt, then report whole-file integrity. The in-progress
    /// slot is cleared either way.
    fn end_of_file(&mut self, name: &str) -> Vec<ServerMessage> {
        let file = match self.current.take() {
            Some(file) if file.name() == name => file,
            other => {
                self.current = other;
                warn!(file = name, "end of file without matching transfer");
                return vec![ServerMessage::Confirmation(false)];
            }
        };
        let path = file.path().to_path_buf();
        let bytes = file.bytes_written();
        let verified = match file.finish() {
            Ok(verified) => verified,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "cannot verify file");
                if let Err(e) = remove_if_exists(&path) {
                    warn!(file = %path.display(), error = %e, "cannot remove unverified file");
                }
                false
            }
        };
        if verified {
            info!(file = %path.display(), bytes, "file received");
        } else {
            warn!(file = %path.display(), "file checksum mismatch, deleted");
        }
        vec![
            ServerMessage::Confirmation(true),
            ServerMessage::FileIntegrity(verified),
        ]
    }

    fn abort(&mut self, name: &str) -> ServerMessage {
        match self.current.take() {
            Some(file) => {
                info!(file = name, bytes = file.bytes_written(), "transfer aborted by client");
                if let Err(e) = file.discard() {
                    warn!(file = name, error = %e, "cannot remove partial file");
                }
            }
            None => debug!(file = name, "abort with no transfer in progress"),
        }
        ServerMessage::Confirmation(true)
    }

    /// Release everything the session holds. A file still in flight is
    /// incomplete and gets deleted.
    pub fn close(&mut self) {
        if let Some(file) = self.current.take() {
            warn!(file = %file.path().display(), "connection ended mid-transfer, removing partial file");
            if let Err(e) = file.discard() {
                warn!(error = %e, "cannot remove partial file");
            }
        }
        self.reassembler = StreamReassembler::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_hex;
    use crate::protocol::client_op;
    use crate::transfer::faults::FullDisk;
    use tempfile::TempDir;
    use ServerMessage::{ChunkIntegrity, Confirmation, FileIntegrity};

    fn create(name: &str, data: &[u8]) -> ClientMessage {
        ClientMessage::CreateFile(FileHeader {
            name: name.into(),
            size: data.len() as u64,
            chunk_size: 5,
            checksum: digest_hex(data),
        })
    }

    fn chunk(name: &str, number: u64, data: &[u8]) -> ClientMessage {
        ClientMessage::FileChunk(FileChunk {
            file_name: name.into(),
            number,
            data: data.to_vec(),
            checksum: digest_hex(data),
        })
    }

    fn feed(session: &mut Session, msgs: &[ClientMessage]) -> Vec<ServerMessage> {
        let bytes: Vec<u8> = msgs.iter().flat_map(|m| m.encode()).collect();
        session.on_bytes(&bytes).unwrap()
    }

    #[test]
    fn test_ten_byte_file_in_two_chunks() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        assert_eq!(s.greeting(), ServerMessage::ChunkSize(5));
        let data = b"0123456789";
        let replies = feed(
            &mut s,
            &[
                create("ten.bin", data),
                chunk("ten.bin", 1, &data[..5]),
                chunk("ten.bin", 2, &data[5..]),
                ClientMessage::EndOfFile("ten.bin".into()),
            ],
        );
        assert_eq!(
            replies,
            vec![
                Confirmation(true),
                ChunkIntegrity(true),
                ChunkIntegrity(true),
                Confirmation(true),
                FileIntegrity(true)
            ]
        );
        assert_eq!(std::fs::read(tmp.path().join("ten.bin")).unwrap(), data);
        assert!(s.is_idle());
    }

    #[test]
    fn test_bad_chunk_checksum_then_retry() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let data = b"0123456789";
        feed(&mut s, &[create("f.bin", data), chunk("f.bin", 1, &data[..5])]);

        let mut corrupt = chunk("f.bin", 2, &data[5..]);
        if let ClientMessage::FileChunk(c) = &mut corrupt {
            c.checksum = digest_hex(b"wrong");
        }
        assert_eq!(feed(&mut s, &[corrupt]), vec![ChunkIntegrity(false)]);
        assert_eq!(s.current_file().unwrap().current_chunk(), 1);
        assert_eq!(s.current_file().unwrap().bytes_written(), 5);

        assert_eq!(feed(&mut s, &[chunk("f.bin", 2, &data[5..])]), vec![ChunkIntegrity(true)]);
        let replies = feed(&mut s, &[ClientMessage::EndOfFile("f.bin".into())]);
        assert_eq!(replies, vec![Confirmation(true), FileIntegrity(true)]);
        assert_eq!(std::fs::read(tmp.path().join("f.bin")).unwrap(), data);
    }

    #[test]
    fn test_out_of_sequence_chunk_rejected_without_write() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let data = b"0123456789";
        feed(&mut s, &[create("f.bin", data), chunk("f.bin", 1, &data[..5])]);
        for bad in [1, 3, 0] {
            assert_eq!(feed(&mut s, &[chunk("f.bin", bad, &data[5..])]), vec![Confirmation(false)]);
            assert_eq!(s.current_file().unwrap().current_chunk(), 1);
        }
        assert_eq!(s.current_file().unwrap().bytes_written(), 5);
    }

    #[test]
    fn test_second_create_rejected_while_in_progress() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let data = b"0123456789";
        feed(&mut s, &[create("first.bin", data), chunk("first.bin", 1, &data[..5])]);

        assert_eq!(feed(&mut s, &[create("second.bin", b"zz")]), vec![Confirmation(false)]);
        assert!(!tmp.path().join("second.bin").exists());
        let current = s.current_file().unwrap();
        assert_eq!(current.name(), "first.bin");
        assert_eq!(current.current_chunk(), 1);

        assert_eq!(feed(&mut s, &[chunk("first.bin", 2, &data[5..])]), vec![ChunkIntegrity(true)]);
    }

    #[test]
    fn test_nested_directories_return_to_root() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let initial = s.directories().clone();
        let replies = feed(
            &mut s,
            &[
                ClientMessage::CreateDirectory("A".into()),
                ClientMessage::CreateDirectory("B".into()),
            ],
        );
        assert_eq!(replies, vec![Confirmation(true), Confirmation(true)]);
        assert_eq!(s.directories().current(), tmp.path().join("A").join("B"));
        assert!(tmp.path().join("A/B").is_dir());

        let replies = feed(
            &mut s,
            &[
                ClientMessage::EndOfDirectory("B".into()),
                ClientMessage::EndOfDirectory("A".into()),
            ],
        );
        assert_eq!(replies, vec![Confirmation(true), Confirmation(true)]);
        assert_eq!(s.directories(), &initial);

        // One pop too many
        assert_eq!(
            feed(&mut s, &[ClientMessage::EndOfDirectory("A".into())]),
            vec![Confirmation(false)]
        );
        assert_eq!(s.directories(), &initial);
    }

    #[test]
    fn test_files_land_in_current_directory() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let replies = feed(
            &mut s,
            &[
                ClientMessage::CreateDirectory("docs".into()),
                create("a.txt", b"abc"),
                chunk("a.txt", 1, b"abc"),
                ClientMessage::EndOfFile("a.txt".into()),
                ClientMessage::EndOfDirectory("docs".into()),
                create("b.txt", b"b"),
            ],
        );
        assert_eq!(replies.len(), 7);
        assert_eq!(std::fs::read(tmp.path().join("docs/a.txt")).unwrap(), b"abc");
        assert_eq!(
            s.current_file().unwrap().path(),
            tmp.path().join("b.txt").as_path()
        );
    }

    #[test]
    fn test_abort_deletes_partial_and_allows_recreate() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let data = b"0123456789";
        feed(&mut s, &[create("f.bin", data), chunk("f.bin", 1, &data[..5])]);
        assert!(tmp.path().join("f.bin").exists());

        assert_eq!(feed(&mut s, &[ClientMessage::AbortTransfer("f.bin".into())]), vec![Confirmation(true)]);
        assert!(!tmp.path().join("f.bin").exists());
        assert!(s.current_file().is_none());

        assert_eq!(feed(&mut s, &[create("f.bin", data)]), vec![Confirmation(true)]);
    }

    #[test]
    fn test_whole_file_mismatch_deletes_output() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let replies = feed(
            &mut s,
            &[
                create("f.bin", b"declared"),
                chunk("f.bin", 1, b"actual"),
                ClientMessage::EndOfFile("f.bin".into()),
            ],
        );
        assert_eq!(replies[2..], [Confirmation(true), FileIntegrity(false)]);
        assert!(!tmp.path().join("f.bin").exists());
        assert!(s.current_file().is_none());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let replies = feed(
            &mut s,
            &[
                ClientMessage::CreateDirectory(String::new()),
                ClientMessage::CreateDirectory("..".into()),
                create("../escape.bin", b"x"),
            ],
        );
        assert_eq!(replies, vec![Confirmation(false); 3]);
        assert_eq!(s.directories().depth(), 0);
        assert!(s.current_file().is_none());
    }

    #[test]
    fn test_chunk_and_eof_without_transfer() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let replies = feed(
            &mut s,
            &[chunk("ghost", 1, b"x"), ClientMessage::EndOfFile("ghost".into())],
        );
        assert_eq!(replies, vec![Confirmation(false), Confirmation(false)]);
    }

    #[test]
    fn test_unknown_opcode_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let mut bytes = Packet::new(42, b"junk".to_vec()).encode();
        bytes.extend(ClientMessage::CreateDirectory("d".into()).encode());
        assert_eq!(s.on_bytes(&bytes).unwrap(), vec![Confirmation(true)]);
    }

    #[test]
    fn test_malformed_payload_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let bytes = Packet::new(client_op::CREATE_FILE, b"not json".to_vec()).encode();
        assert!(matches!(
            s.on_bytes(&bytes),
            Err(Error::Protocol(ProtocolError::MalformedPacket(_)))
        ));
    }

    #[test]
    fn test_split_reads_reach_same_state() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let data = b"0123456789";
        let bytes: Vec<u8> = [
            create("f.bin", data),
            chunk("f.bin", 1, &data[..5]),
            chunk("f.bin", 2, &data[5..]),
            ClientMessage::EndOfFile("f.bin".into()),
        ]
        .iter()
        .flat_map(|m| m.encode())
        .collect();
        let mut replies = Vec::new();
        for piece in bytes.chunks(7) {
            replies.extend(s.on_bytes(piece).unwrap());
        }
        assert_eq!(replies.last(), Some(&FileIntegrity(true)));
        assert_eq!(std::fs::read(tmp.path().join("f.bin")).unwrap(), data);
    }

    #[test]
    fn test_close_removes_in_flight_file() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        feed(&mut s, &[create("f.bin", b"0123456789"), chunk("f.bin", 1, b"01234")]);
        s.close();
        assert!(!tmp.path().join("f.bin").exists());
        assert!(s.is_idle());
    }

    #[test]
    fn test_directory_stack_push_pop() {
        let tmp = TempDir::new().unwrap();
        let mut stack = DirectoryStack::new(tmp.path());
        for n in 1..=4 {
            let before = stack.clone();
            for i in 0..n {
                stack.push(&format!("d{}", i)).unwrap();
            }
            assert_eq!(stack.depth(), n);
            for _ in 0..n {
                stack.pop().unwrap();
            }
            assert_eq!(stack, before);
            assert!(matches!(stack.pop(), Err(Error::DirectoryStackUnderflow)));
        }
        // Reusing an existing directory is fine
        stack.push("d0").unwrap();
        assert_eq!(stack.top(), Some("d0"));
    }

    #[test]
    fn test_write_failure_drops_file_and_refuses_chunk() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        let big = vec![3u8; 16 * 1024];
        feed(&mut s, &[create("big.bin", &big)]);
        s.current.as_mut().unwrap().redirect(FullDisk);

        let replies = feed(&mut s, &[chunk("big.bin", 1, &big)]);
        assert_eq!(replies, vec![Confirmation(false)]);
        assert!(s.current_file().is_none());
        assert!(!tmp.path().join("big.bin").exists());

        // The client's abort still completes, and the name is free again
        let replies = feed(
            &mut s,
            &[
                ClientMessage::AbortTransfer("big.bin".into()),
                create("big.bin", &big),
            ],
        );
        assert_eq!(replies, vec![Confirmation(true), Confirmation(true)]);
    }

    #[test]
    fn test_unflushable_file_fails_integrity_and_is_removed() {
        let tmp = TempDir::new().unwrap();
        let mut s = Session::new(tmp.path(), 5);
        feed(&mut s, &[create("f.bin", b"01234")]);
        s.current.as_mut().unwrap().redirect(FullDisk);
        // Small enough to sit in the write buffer until end of file
        let replies = feed(
            &mut s,
            &[
                chunk("f.bin", 1, b"01234"),
                ClientMessage::EndOfFile("f.bin".into()),
            ],
        );
        assert_eq!(
            replies,
            vec![ChunkIntegrity(true), Confirmation(true), FileIntegrity(false)]
        );
        assert!(!tmp.path().join("f.bin").exists());
        assert!(s.is_idle());
    }
}

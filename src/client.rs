//! Client side: the TCP connection and the transfer orchestrator.
//!
//! The client is strictly request/reply. Every message is answered before the
//! next one goes out, so replies never need to be matched against requests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{ClientMessage, Packet, ServerMessage};
use crate::error::{Error, ProtocolError, Result};
use crate::fs_enum::{Sources, TransferDirectory};
use crate::logger::{Logger, NoopLogger};
use crate::protocol::{retry, timeouts, MAX_CHUNK_SIZE};
use crate::reassembly::StreamReassembler;
use crate::transfer::OutgoingFile;

/// One request/reply channel to the server.
pub trait Transport {
    fn send(&mut self, msg: &ClientMessage) -> Result<()>;
    /// Block until the next server message arrives.
    fn receive(&mut self) -> Result<ServerMessage>;
}

/// TCP connection to a server, with its own reassembler.
pub struct Connection {
    stream: TcpStream,
    reassembler: StreamReassembler,
    queue: VecDeque<Packet>,
}

impl Connection {
    /// Connect and set the reply timeout as the socket read timeout.
    pub fn connect(addr: &str, reply_timeout: Duration) -> Result<Self> {
        let connect_timeout = Duration::from_millis(timeouts::CONNECT_MS);
        let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", addr));
        let addrs = addr.to_socket_addrs().map_err(Error::Connection)?;
        for sock_addr in addrs {
            match TcpStream::connect_timeout(&sock_addr, connect_timeout) {
                Ok(stream) => return Self::from_stream(stream, reply_timeout),
                Err(e) => last_err = e,
            }
        }
        Err(Error::Connection(last_err))
    }

    pub fn from_stream(stream: TcpStream, reply_timeout: Duration) -> Result<Self> {
        stream.set_nodelay(true).map_err(Error::Connection)?;
        stream
            .set_read_timeout(Some(reply_timeout))
            .map_err(Error::Connection)?;
        Ok(Self {
            stream,
            reassembler: StreamReassembler::new(),
            queue: VecDeque::new(),
        })
    }
}

impl Transport for Connection {
    fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        self.stream
            .write_all(&msg.encode())
            .map_err(Error::Connection)
    }

    fn receive(&mut self) -> Result<ServerMessage> {
        let mut buf = [0u8; 4096];
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(ServerMessage::decode(&packet)?);
            }
            let n = match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Err(Error::Timeout)
                }
                Err(e) => return Err(Error::Connection(e)),
            };
            self.queue.extend(self.reassembler.feed(&buf[..n])?);
        }
    }
}

/// Wait for the chunk-size announcement that opens every session.
pub fn handshake<T: Transport>(transport: &mut T) -> Result<u32> {
    match transport.receive()? {
        ServerMessage::ChunkSize(size) if (1..=MAX_CHUNK_SIZE).contains(&size) => Ok(size),
        ServerMessage::ChunkSize(size) => Err(ProtocolError::malformed(format!(
            "announced chunk size {} out of range",
            size
        ))
        .into()),
        other => Err(unexpected("chunk size", other)),
    }
}

fn unexpected(expected: &'static str, got: ServerMessage) -> Error {
    Error::UnexpectedReply {
        expected,
        got: format!("{:?}", got),
    }
}

/// Retry ceilings for one run
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub chunk_attempts: u32,
    pub read_attempts: u32,
    pub file_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            chunk_attempts: retry::CHUNK_ATTEMPTS,
            read_attempts: retry::READ_ATTEMPTS,
            file_attempts: retry::FILE_ATTEMPTS,
        }
    }
}

/// How a single file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Server verified the whole-file checksum
    Sent,
    /// Server refused the create-file request
    Rejected,
    /// Abort handshake completed after chunk or read failures
    Aborted,
    /// Whole-file integrity failed on every attempt
    Failed,
    /// Could not be opened locally; nothing was sent
    Unreadable,
}

enum Attempt {
    Verified,
    Rejected,
    Aborted,
    IntegrityFailed,
}

/// Totals for a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub files_sent: u64,
    pub bytes_sent: u64,
    pub failed: Vec<String>,
    pub skipped_directories: Vec<String>,
    /// Directories whose end-of-directory the server refused
    pub unclosed_directories: Vec<String>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
            && self.skipped_directories.is_empty()
            && self.unclosed_directories.is_empty()
    }
}

/// Drives the per-file and per-directory state machines over a transport.
pub struct Orchestrator<T: Transport> {
    transport: T,
    chunk_size: u32,
    policy: RetryPolicy,
    logger: Arc<dyn Logger>,
    report: TransferReport,
    depth: usize,
}

impl<T: Transport> Orchestrator<T> {
    /// Wrap a transport whose chunk-size announcement was already received.
    pub fn new(transport: T, chunk_size: u32) -> Self {
        Self {
            transport,
            chunk_size,
            policy: RetryPolicy::default(),
            logger: Arc::new(NoopLogger),
            report: TransferReport::default(),
            depth: 0,
        }
    }

    /// Receive the chunk-size announcement, then wrap the transport.
    pub fn connect(mut transport: T) -> Result<Self> {
        let chunk_size = handshake(&mut transport)?;
        debug!(chunk_size, "received chunk size");
        Ok(Self::new(transport, chunk_size))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    pub fn report(&self) -> &TransferReport {
        &self.report
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send loose files first, then each directory tree. Only connection-level
    /// failures return `Err`; per-file problems land in the report.
    pub fn run(&mut self, sources: &mut Sources) -> Result<TransferReport> {
        let started = Instant::now();
        for file in sources.files.iter_mut() {
            self.send_file(file)?;
        }
        for dir in sources.directories.iter_mut() {
            self.send_directory(dir)?;
        }
        self.logger.done(
            self.report.files_sent,
            self.report.bytes_sent,
            started.elapsed().as_secs_f64(),
        );
        Ok(self.report.clone())
    }

    /// Depth-first, pre-order: create, files, subdirectories, end.
    /// A refused directory skips its subtree only.
    pub fn send_directory(&mut self, dir: &mut TransferDirectory) -> Result<()> {
        self.transport
            .send(&ClientMessage::CreateDirectory(dir.name.clone()))?;
        if !self.expect_confirmation()? {
            warn!(dir = %dir.name, "server refused directory, skipping subtree");
            self.report.skipped_directories.push(dir.name.clone());
            return Ok(());
        }
        self.depth += 1;
        self.logger.directory(&dir.name, self.depth);

        for file in dir.files.iter_mut() {
            self.send_file(file)?;
        }
        for sub in dir.subdirs.iter_mut() {
            self.send_directory(sub)?;
        }

        self.depth -= 1;
        self.transport
            .send(&ClientMessage::EndOfDirectory(dir.name.clone()))?;
        if !self.expect_confirmation()? {
            warn!(dir = %dir.name, "server refused end of directory");
            self.report.unclosed_directories.push(dir.name.clone());
        }
        Ok(())
    }

    /// Send one file, restarting from scratch while whole-file integrity fails.
    pub fn send_file(&mut self, file: &mut OutgoingFile) -> Result<FileOutcome> {
        if let Err(e) = file.open(self.chunk_size as usize) {
            warn!(file = %file.path().display(), error = %e, "cannot open source file");
            let size = std::fs::metadata(file.path()).map(|m| m.len()).unwrap_or(0);
            self.logger.file_start(file.name(), size);
            self.record_failure(file, &e.to_string());
            return Ok(FileOutcome::Unreadable);
        }
        debug!(file = %file.name(), size = file.size(), checksum = file.checksum().unwrap_or_default(), "sending file");
        self.logger.file_start(file.name(), file.size());

        let mut outcome = FileOutcome::Failed;
        for attempt in 1..=self.policy.file_attempts.max(1) {
            if attempt > 1 {
                info!(file = %file.name(), attempt, "restarting file after integrity failure");
                if let Err(e) = file.reset() {
                    warn!(file = %file.name(), error = %e, "cannot rewind source file");
                    break;
                }
            }
            outcome = match self.try_send_file(file) {
                Ok(Attempt::Verified) => FileOutcome::Sent,
                Ok(Attempt::Rejected) => FileOutcome::Rejected,
                Ok(Attempt::Aborted) => FileOutcome::Aborted,
                Ok(Attempt::IntegrityFailed) => {
                    warn!(file = %file.name(), attempt, "whole-file checksum mismatch");
                    FileOutcome::Failed
                }
                Err(e) => {
                    file.close();
                    return Err(e);
                }
            };
            if outcome != FileOutcome::Failed {
                break;
            }
        }
        file.close();

        match outcome {
            FileOutcome::Sent => {
                info!(file = %file.name(), bytes = file.bytes_sent(), "file verified");
                self.report.files_sent += 1;
                self.report.bytes_sent += file.bytes_sent();
                self.logger.file_done(file.name(), file.bytes_sent());
            }
            FileOutcome::Rejected => self.record_failure(file, "rejected by server"),
            FileOutcome::Aborted => self.record_failure(file, "aborted"),
            FileOutcome::Failed => self.record_failure(file, "integrity check failed"),
            FileOutcome::Unreadable => {}
        }
        Ok(outcome)
    }

    fn record_failure(&mut self, file: &OutgoingFile, reason: &str) {
        self.report.failed.push(file.name().to_string());
        self.logger.file_failed(file.name(), reason);
    }

    fn try_send_file(&mut self, file: &mut OutgoingFile) -> Result<Attempt> {
        self.transport.send(&ClientMessage::CreateFile(file.header()))?;
        if !self.expect_confirmation()? {
            warn!(file = %file.name(), "server refused file");
            return Ok(Attempt::Rejected);
        }

        let mut read_failures = 0u32;
        loop {
            match file.read_chunk() {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    read_failures += 1;
                    warn!(file = %file.name(), attempt = read_failures, error = %e, "read failed");
                    if read_failures >= self.policy.read_attempts {
                        self.abort(file)?;
                        return Ok(Attempt::Aborted);
                    }
                    continue;
                }
            }
            if !self.send_chunk(file)? {
                self.abort(file)?;
                return Ok(Attempt::Aborted);
            }
        }

        self.transport
            .send(&ClientMessage::EndOfFile(file.name().to_string()))?;
        if !self.expect_confirmation()? {
            // Server had no matching transfer; no integrity reply follows
            return Ok(Attempt::IntegrityFailed);
        }
        match self.transport.receive()? {
            ServerMessage::FileIntegrity(true) => Ok(Attempt::Verified),
            ServerMessage::FileIntegrity(false) => Ok(Attempt::IntegrityFailed),
            other => Err(unexpected("file integrity", other)),
        }
    }

    /// Send the current chunk until the server accepts it. Returns false when
    /// the file must be aborted.
    fn send_chunk(&mut self, file: &mut OutgoingFile) -> Result<bool> {
        let chunk = ClientMessage::FileChunk(file.chunk());
        for attempt in 1..=self.policy.chunk_attempts {
            self.transport.send(&chunk)?;
            match self.transport.receive()? {
                ServerMessage::ChunkIntegrity(true) => {
                    file.mark_chunk_sent();
                    self.logger
                        .chunk_sent(file.name(), file.bytes_sent(), file.size());
                    return Ok(true);
                }
                ServerMessage::ChunkIntegrity(false) => {
                    debug!(file = %file.name(), chunk = file.current_chunk(), attempt, "chunk rejected, resending");
                }
                ServerMessage::Confirmation(false) => {
                    warn!(file = %file.name(), chunk = file.current_chunk(), "chunk out of sequence");
                    return Ok(false);
                }
                other => return Err(unexpected("chunk integrity", other)),
            }
        }
        warn!(file = %file.name(), chunk = file.current_chunk(), "chunk retry limit reached");
        Ok(false)
    }

    /// Abort handshake. A refused or missing confirmation ends the run.
    fn abort(&mut self, file: &OutgoingFile) -> Result<()> {
        self.transport
            .send(&ClientMessage::AbortTransfer(file.name().to_string()))?;
        if self.expect_confirmation()? {
            Ok(())
        } else {
            Err(Error::AbortRejected(file.name().to_string()))
        }
    }

    fn expect_confirmation(&mut self) -> Result<bool> {
        match self.transport.receive()? {
            ServerMessage::Confirmation(ok) => Ok(ok),
            other => Err(unexpected("confirmation", other)),
        }
    }
}

//! Per-file transfer state.
//!
//! [`OutgoingFile`] is the client's view of a file being sent, [`IncomingFile`]
//! the server's view of a file being received. Both own their file handle and
//! release it through an explicit `close`/`finish`/`discard` call.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::codec::{FileChunk, FileHeader};
use crate::error::{Error, Result};

/// Where an outgoing file's bytes come from.
trait Source: Read + Seek {}
impl<T: Read + Seek> Source for T {}

/// Where an incoming file's bytes go. `sync` runs once, after the final flush.
pub(crate) trait Sink: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl Sink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Client-side state for one source file.
pub struct OutgoingFile {
    path: PathBuf,
    name: String,
    size: u64,
    chunk_size: usize,
    checksum: Option<String>,
    reader: Option<Box<dyn Source>>,
    // Chunks read so far; the last one read is number `current_chunk`
    current_chunk: u64,
    chunk_data: Vec<u8>,
    chunk_checksum: String,
    // Bytes consumed from the reader, used to re-seek after a failed read
    offset: u64,
    reseek: bool,
    bytes_sent: u64,
}

impl fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("current_chunk", &self.current_chunk)
            .field("bytes_sent", &self.bytes_sent)
            .finish_non_exhaustive()
    }
}

impl OutgoingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            size: 0,
            chunk_size: 0,
            checksum: None,
            reader: None,
            current_chunk: 0,
            chunk_data: Vec::new(),
            chunk_checksum: String::new(),
            offset: 0,
            reseek: false,
            bytes_sent: 0,
        }
    }

    /// An already-open source that is not backed by a file on disk.
    #[cfg(test)]
    pub(crate) fn from_reader(name: &str, size: u64, reader: impl Read + Seek + 'static) -> Self {
        let mut file = Self::new(name);
        file.size = size;
        file.reader = Some(Box::new(reader) as Box<dyn Source>);
        file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    pub fn current_chunk(&self) -> u64 {
        self.current_chunk
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Open for reading. On the first open the whole-file checksum is computed
    /// with a full read pass and the reader rewound.
    pub fn open(&mut self, chunk_size: usize) -> Result<()> {
        let read_failure = |source| Error::ReadFailure {
            path: self.path.clone(),
            source,
        };
        if self.reader.is_none() {
            let file = File::open(&self.path).map_err(read_failure)?;
            self.size = file.metadata().map_err(read_failure)?.len();
            self.reader = Some(Box::new(BufReader::new(file)) as Box<dyn Source>);
        }
        if self.checksum.is_none() {
            if let Some(reader) = self.reader.as_mut() {
                let digest = checksum::digest_reader(reader).map_err(read_failure)?;
                reader.seek(SeekFrom::Start(0)).map_err(read_failure)?;
                self.checksum = Some(digest);
            }
        }
        self.chunk_size = chunk_size.max(1);
        Ok(())
    }
    /// Metadata message announcing this file. Call after `open`.
    pub fn header(&self) -> FileHeader {
        FileHeader {
            name: self.name.clone(),
            size: self.size,
            chunk_size: self.chunk_size as u32,
            checksum: self.checksum.clone().unwrap_or_default(),
        }
    }

    /// Read the next chunk. Returns `Ok(false)` at end of file.
    ///
    /// On success the chunk index advances and the chunk's checksum is ready.
    /// A failed read leaves the index untouched, so calling again retries the
    /// same chunk from the same offset.
    pub fn read_chunk(&mut self) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::ReadFailure {
                path: self.path.clone(),
                source: io::Error::new(io::ErrorKind::NotConnected, "file is not open"),
            });
        };
        let result = (|| -> io::Result<Vec<u8>> {
            if self.reseek {
                reader.seek(SeekFrom::Start(self.offset))?;
            }
            let mut data = Vec::with_capacity(self.chunk_size);
            reader.by_ref().take(self.chunk_size as u64).read_to_end(&mut data)?;
            Ok(data)
        })();
        let data = match result {
            Ok(data) => data,
            Err(source) => {
                self.reseek = true;
                return Err(Error::ReadFailure {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        self.reseek = false;
        if data.is_empty() {
            return Ok(false);
        }
        self.offset += data.len() as u64;
        self.chunk_checksum = checksum::digest_hex(&data);
        self.chunk_data = data;
        self.current_chunk += 1;
        Ok(true)
    }

    /// The most recently read chunk, as sent on the wire. Resends reuse it as is.
    pub fn chunk(&self) -> FileChunk {
        FileChunk {
            file_name: self.name.clone(),
            number: self.current_chunk,
            data: self.chunk_data.clone(),
            checksum: self.chunk_checksum.clone(),
        }
    }

    /// Record that the current chunk was accepted by the server.
    pub fn mark_chunk_sent(&mut self) {
        self.bytes_sent += self.chunk_data.len() as u64;
    }

    /// Rewind to the first byte and clear all counters for a full restart.
    /// The whole-file checksum is kept.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0)).map_err(|source| Error::ReadFailure {
                path: self.path.clone(),
                source,
            })?;
        }
        self.current_chunk = 0;
        self.chunk_data.clear();
        self.chunk_checksum.clear();
        self.offset = 0;
        self.reseek = false;
        self.bytes_sent = 0;
        Ok(())
    }

    pub fn close(&mut self) {
        self.reader = None;
    }
}

/// Server-side state for the file currently being received.
pub struct IncomingFile {
    path: PathBuf,
    name: String,
    declared_checksum: String,
    writer: Option<BufWriter<Box<dyn Sink>>>,
    current_chunk: u64,
    bytes_written: u64,
}

impl fmt::Debug for IncomingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingFile")
            .field("path", &self.path)
            .field("current_chunk", &self.current_chunk)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl IncomingFile {
    /// Create (or truncate) the destination file and open it for writing.
    pub fn create(path: PathBuf, header: &FileHeader) -> Result<Self> {
        let file = File::create(&path)?;
        Ok(Self {
            path,
            name: header.name.clone(),
            declared_checksum: header.checksum.clone(),
            writer: Some(BufWriter::new(Box::new(file) as Box<dyn Sink>)),
            current_chunk: 0,
            bytes_written: 0,
        })
    }

    /// Send all further writes to `sink` instead of the file on disk.
    #[cfg(test)]
    pub(crate) fn redirect(&mut self, sink: impl Sink + 'static) {
        self.writer = Some(BufWriter::new(Box::new(sink) as Box<dyn Sink>));
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_chunk(&self) -> u64 {
        self.current_chunk
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append a chunk after checking its number and checksum. A rejected chunk
    /// leaves both the index and the output file untouched. An I/O error may
    /// leave part of the chunk behind; the file must then be discarded.
    pub fn write_chunk(&mut self, chunk: &FileChunk) -> Result<()> {
        let expected = self.current_chunk + 1;
        if chunk.number != expected {
            return Err(Error::ChunkSequenceViolation {
                expected,
                got: chunk.number,
            });
        }
        if checksum::digest_hex(&chunk.data) != chunk.checksum {
            return Err(Error::ChecksumMismatch {
                name: format!("{} chunk {}", self.name, chunk.number),
            });
        }
        let writer = self.writer.as_mut().ok_or(Error::NoTransferInProgress)?;
        writer.write_all(&chunk.data)?;
        self.current_chunk = expected;
        self.bytes_written += chunk.data.len() as u64;
        Ok(())
    }

    /// Close the handle and verify the file on disk against the declared
    /// checksum. A mismatching file is deleted. Returns whether it verified.
    pub fn finish(mut self) -> Result<bool> {
        if let Err(e) = self.flush_and_close() {
            remove_if_exists(&self.path)?;
            return Err(e);
        }
        let verified = checksum::digest_file(&self.path)? == self.declared_checksum;
        if !verified {
            remove_if_exists(&self.path)?;
        }
        Ok(verified)
    }

    /// Close the handle and delete the partial output.
    pub fn discard(mut self) -> Result<()> {
        // Buffered bytes are dropped with the file; a failing flush is moot
        if let Some(writer) = self.writer.take() {
            let _ = writer.into_parts();
        }
        remove_if_exists(&self.path)
    }

    fn flush_and_close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.into_inner().map_err(|e| e.into_error())?.sync()?;
        }
        Ok(())
    }
}

/// Delete `path`; a file that is already gone is not an error.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Readers and writers that fail on demand.
#[cfg(test)]
pub(crate) mod faults {
    use super::Sink;
    use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

    /// In-memory source whose read fails once for every listed offset, each
    /// time a read starts there.
    pub(crate) struct FlakyReader {
        inner: Cursor<Vec<u8>>,
        fail_at: Vec<u64>,
    }

    impl FlakyReader {
        pub(crate) fn new(data: &[u8], fail_at: &[u64]) -> Self {
            Self {
                inner: Cursor::new(data.to_vec()),
                fail_at: fail_at.to_vec(),
            }
        }
    }

    impl Read for FlakyReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let pos = self.inner.position();
            if let Some(i) = self.fail_at.iter().position(|&p| p == pos) {
                self.fail_at.remove(i);
                return Err(io::Error::new(io::ErrorKind::Other, "injected read failure"));
            }
            self.inner.read(buf)
        }
    }

    impl Seek for FlakyReader {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    /// A sink with no space left.
    pub(crate) struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink for FullDisk {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

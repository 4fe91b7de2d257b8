//! Checksum and hashing utilities
//!
//! Both ends hash with MD5 and exchange the digest as lowercase hex. It guards
//! against corruption in transit, not against a malicious peer.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const READ_BUF: usize = 64 * 1024;

/// Digest of one chunk (or any byte slice)
pub fn digest_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Digest of everything `reader` yields until EOF.
pub fn digest_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// Whole-file digest
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    digest_reader(&mut reader)
}

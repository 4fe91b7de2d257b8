//! Shared framing logic used by the codec, the reassembler and the session
//!
//! Header layout: OPCODE (1) | LENGTH (4, little-endian). LENGTH counts the
//! payload only.

use crate::error::{Error, ProtocolError};
use crate::protocol::{HEADER_LEN, MAX_FRAME_SIZE};
use std::path::{Component, Path};

/// Validate frame payload size against protocol::MAX_FRAME_SIZE
pub fn validate_frame_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(size));
    }
    Ok(())
}

/// Build frame header (5 bytes)
pub fn build_frame_header(opcode: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = opcode;
    header[1..5].copy_from_slice(&payload_len.to_le_bytes());
    header
}

/// Parse frame header from the first five bytes of `buf`.
/// Returns: (opcode, payload_length), or None when fewer than five bytes are available.
pub fn parse_frame_header(buf: &[u8]) -> Option<(u8, u32)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let payload_len = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
    Some((buf[0], payload_len))
}

/// Check that a name received from the peer is a single, plain path segment.
/// This prevents path traversal by rejecting:
/// 1. Empty names and names containing NUL
/// 2. Absolute paths, parent directory components, and root/prefix components
/// 3. Names spanning more than one component ("a/b")
pub fn validate_name(name: &str) -> Result<&Path, Error> {
    if name.is_empty() || name.contains('\0') {
        return Err(Error::InvalidName(name.to_string()));
    }
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(path),
        _ => Err(Error::InvalidName(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_round_trip() {
        let header = build_frame_header(3, 12345);
        assert_eq!(parse_frame_header(&header), Some((3, 12345)));
    }

    #[test]
    fn test_frame_header_is_little_endian() {
        let header = build_frame_header(2, 0x0102_0304);
        assert_eq!(header, [2, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_parse_frame_header_needs_five_bytes() {
        assert_eq!(parse_frame_header(&[1, 0, 0, 0]), None);
        assert_eq!(parse_frame_header(&[]), None);
        assert_eq!(parse_frame_header(&[1, 7, 0, 0, 0, 99]), Some((1, 7)));
    }

    #[test]
    fn test_validate_frame_size_edge_cases() {
        assert!(validate_frame_size(0).is_ok());
        assert!(validate_frame_size(MAX_FRAME_SIZE).is_ok());
        assert_eq!(
            validate_frame_size(MAX_FRAME_SIZE + 1),
            Err(ProtocolError::FrameTooLarge(MAX_FRAME_SIZE + 1))
        );
    }

    #[test]
    fn test_validate_name_safe() {
        assert!(validate_name("file.txt").is_ok());
        assert!(validate_name("dir with spaces").is_ok());
        assert!(validate_name(".hidden").is_ok());
    }

    #[test]
    fn test_validate_name_unsafe() {
        assert!(validate_name("").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("/etc").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("nul\0byte").is_err());
    }
}

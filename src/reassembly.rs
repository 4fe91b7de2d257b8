//! Turns raw socket reads into complete packets.
//!
//! TCP delivers a byte stream with arbitrary split points. A single read may
//! hold several packets, a fraction of one, or the tail of one and the head of
//! the next. The reassembler keeps two buffers: bytes not yet examined, and the
//! packet currently being completed together with the number of bytes it still
//! needs.

use crate::codec::Packet;
use crate::error::ProtocolError;
use crate::protocol::HEADER_LEN;
use crate::protocol_core::{parse_frame_header, validate_frame_size};

#[derive(Debug, Default)]
pub struct StreamReassembler {
    // Raw bytes received but not yet assigned to a packet
    pending: Vec<u8>,
    // Header and partial payload of the packet in progress
    partial: Vec<u8>,
    // Bytes still needed to complete `partial`; 0 when nothing is in progress
    missing: usize,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one raw read and return every packet it completes, in order.
    ///
    /// A declared length above the frame limit is a fatal framing error; the
    /// reassembler must not be fed again after one.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Packet>, ProtocolError> {
        self.pending.extend_from_slice(bytes);
        let mut packets = Vec::new();

        loop {
            if self.missing > 0 {
                if self.pending.len() < self.missing {
                    self.missing -= self.pending.len();
                    self.partial.append(&mut self.pending);
                    break;
                }
                self.partial.extend(self.pending.drain(..self.missing));
                self.missing = 0;
                let frame = std::mem::take(&mut self.partial);
                packets.push(Packet::from_frame(&frame)?);
                continue;
            }

            let Some((_, payload_len)) = parse_frame_header(&self.pending) else {
                break;
            };
            let payload_len = payload_len as usize;
            validate_frame_size(payload_len)?;
            let target = HEADER_LEN + payload_len;

            if self.pending.len() >= target {
                let frame: Vec<u8> = self.pending.drain(..target).collect();
                packets.push(Packet::from_frame(&frame)?);
            } else {
                self.missing = target - self.pending.len();
                self.partial = std::mem::take(&mut self.pending);
                break;
            }
        }

        Ok(packets)
    }

    /// True when no bytes are buffered, i.e. the stream sits on a packet boundary.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.partial.is_empty()
    }

    /// Number of bytes held back waiting for more input
    pub fn buffered(&self) -> usize {
        self.pending.len() + self.partial.len()
    }
}

//! Audio packet wire format
//!
//! ```text
//! ┌───────────────────┬──────────────────────────────┐
//! │ sequence (i32 BE) │ PCM16 LE mono samples        │
//! └───────────────────┴──────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::{MAX_PACKET_SIZE, PACKET_HEADER_LEN};
use crate::error::NetworkError;

/// Largest payload that fits in one datagram
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_SIZE - PACKET_HEADER_LEN;

/// Borrowed view of one audio packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacket<'a> {
    pub sequence: i32,
    /// Little-endian PCM16 samples; a trailing odd byte is ignored
    pub payload: &'a [u8],
}

impl<'a> AudioPacket<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, NetworkError> {
        if data.len() < PACKET_HEADER_LEN {
            return Err(NetworkError::InvalidPacket);
        }

        let (header, payload) = data.split_at(PACKET_HEADER_LEN);
        Ok(Self {
            sequence: i32::from_be_bytes([header[0], header[1], header[2], header[3]]),
            payload,
        })
    }

    /// Number of whole samples in the payload
    pub fn sample_count(&self) -> usize {
        self.payload.len() / 2
    }
}

/// Build a datagram from a sequence number and PCM16 LE payload
pub fn encode_packet(sequence: i32, payload: &[u8]) -> Result<Bytes, NetworkError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(NetworkError::PacketTooLarge(payload.len() + PACKET_HEADER_LEN));
    }

    let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + payload.len());
    buf.put_i32(sequence);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

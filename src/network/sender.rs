//! Audio sender
//!
//! Packs captured PCM16 frames into sequenced datagrams and sends them to
//! every configured remote endpoint.

use parking_lot::Mutex;
use std::net::SocketAddr;

use crate::error::NetworkError;
use crate::network::packet::{encode_packet, MAX_PAYLOAD_LEN};
use crate::network::udp::UdpSendHandle;

/// Sender statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub frames_sent: u64,
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_errors: u64,
}

struct SenderState {
    sequence: i32,
    stats: SenderStats,
}

/// Sends captured audio to the remote endpoints
pub struct AudioSender {
    socket: UdpSendHandle,
    endpoints: Vec<SocketAddr>,
    state: Mutex<SenderState>,
}

impl AudioSender {
    pub fn new(socket: UdpSendHandle, endpoints: Vec<SocketAddr>) -> Self {
        if endpoints.is_empty() {
            tracing::warn!("No remote endpoints configured; captured audio will be discarded");
        }

        Self {
            socket,
            endpoints,
            state: Mutex::new(SenderState {
                sequence: 0,
                stats: SenderStats::default(),
            }),
        }
    }

    pub fn endpoints(&self) -> &[SocketAddr] {
        &self.endpoints
    }

    /// Send one frame of PCM16 LE audio.
    ///
    /// Frames larger than one datagram are split; every packet gets its own
    /// sequence number.
    pub fn send_frame(&self, frame: &[u8]) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        let mut result = Ok(());

        // Even chunk length keeps samples intact
        for chunk in frame.chunks(MAX_PAYLOAD_LEN & !1) {
            let packet = encode_packet(state.sequence, chunk)?;
            state.sequence = state.sequence.wrapping_add(1);

            for endpoint in &self.endpoints {
                match self.socket.send_to(*endpoint, &packet) {
                    Ok(sent) => {
                        state.stats.packets_sent += 1;
                        state.stats.bytes_sent += sent as u64;
                    }
                    Err(e) => {
                        tracing::debug!("Failed to send audio to {}: {}", endpoint, e);
                        state.stats.send_errors += 1;
                        result = Err(e);
                    }
                }
            }
        }

        state.stats.frames_sent += 1;
        result
    }

    /// Sequence number of the next packet
    pub fn next_sequence(&self) -> i32 {
        self.state.lock().sequence
    }

    pub fn stats(&self) -> SenderStats {
        self.state.lock().stats
    }
}

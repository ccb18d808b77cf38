//! Multi-source network jitter buffer and mixer
//!
//! Every sender (identified by source address and port) gets its own write
//! cursor into one shared ring of PCM16 samples. A new sender starts a full
//! buffer length ahead of the read cursor, which absorbs arrival jitter.
//! Payloads are summed into the ring with int16 saturation, so overlapping
//! senders are heard together. Reading zeroes what was read, so the ring
//! always mixes onto silence.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::network::packet::AudioPacket;
use crate::timing::ms_to_samples;

/// Identifies one network audio sender
pub type PacketSourceKey = SocketAddr;

/// Per-source write state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceCursor {
    /// Monotonic sample offset the next payload is mixed at
    pub write_position: u64,
    /// Sequence number of the last accepted packet
    pub last_sequence: i32,
}

/// Mixer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixerStats {
    pub packets_mixed: u64,
    pub packets_dropped_late: u64,
    pub packets_dropped_overflow: u64,
    pub packets_invalid: u64,
    pub samples_truncated: u64,
    pub sources_evicted: u64,
    pub tracked_sources: usize,
}

/// Jitter buffer mixing any number of sources into one mono stream
pub struct AudioMixer {
    ring: Vec<i16>,
    /// Lead time granted to a new source, in samples
    nominal_len: usize,
    /// Monotonic sample offset of the next sample to be taken
    read_position: u64,
    sources: HashMap<PacketSourceKey, SourceCursor>,
    stats: MixerStats,
}

impl AudioMixer {
    /// Create a mixer with `buffer_ms` of lead time per source.
    ///
    /// The ring holds twice that, so a new source's lead time never
    /// collides with the read cursor.
    pub fn new(buffer_ms: u32) -> Self {
        Self::with_samples(ms_to_samples(buffer_ms))
    }

    /// Create a mixer with a lead time of `nominal_len` samples
    pub fn with_samples(nominal_len: usize) -> Self {
        assert!(nominal_len > 0, "Buffer length must be positive");

        Self {
            ring: vec![0i16; nominal_len * 2],
            nominal_len,
            read_position: 0,
            sources: HashMap::new(),
            stats: MixerStats::default(),
        }
    }

    /// True while at least one source is tracked.
    ///
    /// A tracked source always has its lead-time window ahead of the read
    /// cursor, even if that window is still silent.
    pub fn has_data(&self) -> bool {
        !self.sources.is_empty()
    }

    /// Drop all sources, zero the ring and rewind the read cursor
    pub fn reset(&mut self) {
        self.read_position = 0;
        self.sources.clear();
        self.ring.fill(0);
    }

    /// Mix one network packet from `source` into the ring.
    ///
    /// The packet is a big-endian sequence number followed by little-endian
    /// PCM16 samples. Malformed, late and overflowing packets are dropped
    /// and logged.
    pub fn append(&mut self, source: PacketSourceKey, packet: &[u8]) {
        let packet = match AudioPacket::parse(packet) {
            Ok(packet) => packet,
            Err(_) => {
                tracing::warn!("Invalid incoming packet length {} from {}", packet.len(), source);
                self.stats.packets_invalid += 1;
                return;
            }
        };

        let cursor = self.sources.get(&source).copied().unwrap_or(SourceCursor {
            write_position: self.read_position + self.nominal_len as u64,
            last_sequence: -1,
        });

        let sequence = packet.sequence;
        if sequence < cursor.last_sequence {
            tracing::warn!(
                "Dropping packet from {}; sequence {}, last accepted {}",
                source,
                sequence,
                cursor.last_sequence
            );
            self.stats.packets_dropped_late += 1;
            return;
        }

        let payload = packet.payload;
        let samples = payload.len() / 2;

        let capacity = self.ring.len();
        let ahead = (cursor.write_position - self.read_position) as usize;
        let available = capacity.saturating_sub(ahead);
        if available == 0 {
            tracing::warn!("Dropping packet from {}; no buffer available", source);
            self.stats.packets_dropped_overflow += 1;
            return;
        }
        if available < samples {
            tracing::warn!(
                "Dropping part of packet from {}; available {} samples, packet {} samples",
                source,
                available,
                samples
            );
            self.stats.samples_truncated += (samples - available) as u64;
        }

        // Keep the most recent part of a packet that doesn't fit.
        let copy = available.min(samples);
        let skip = samples - copy;
        let payload = &payload[skip * 2..(skip + copy) * 2];

        let start = (cursor.write_position % capacity as u64) as usize;
        let first = copy.min(capacity - start);

        mix_into(&mut self.ring[start..start + first], &payload[..first * 2]);
        if first < copy {
            mix_into(&mut self.ring[..copy - first], &payload[first * 2..]);
        }

        self.sources.insert(
            source,
            SourceCursor {
                write_position: cursor.write_position + copy as u64,
                last_sequence: sequence,
            },
        );
        self.stats.packets_mixed += 1;
    }

    /// Fill `out` with the next samples, zeroing them in the ring.
    ///
    /// Sources whose write cursor fell behind the read cursor are evicted
    /// and must re-acquire lead time with their next packet.
    pub fn take(&mut self, out: &mut [i16]) {
        let capacity = self.ring.len();
        assert!(out.len() <= capacity, "Read larger than mixer buffer");

        let start = (self.read_position % capacity as u64) as usize;
        let first = out.len().min(capacity - start);

        out[..first].copy_from_slice(&self.ring[start..start + first]);
        self.ring[start..start + first].fill(0);

        if first < out.len() {
            let second = out.len() - first;
            out[first..].copy_from_slice(&self.ring[..second]);
            self.ring[..second].fill(0);
        }

        self.read_position += out.len() as u64;

        let read_position = self.read_position;
        let before = self.sources.len();
        self.sources.retain(|source, cursor| {
            let keep = cursor.write_position >= read_position;
            if !keep {
                tracing::debug!("Source {} ran out of buffered audio", source);
            }
            keep
        });
        self.stats.sources_evicted += (before - self.sources.len()) as u64;
    }

    /// Cursor of a tracked source
    pub fn source(&self, source: &PacketSourceKey) -> Option<SourceCursor> {
        self.sources.get(source).copied()
    }

    /// Monotonic offset of the next sample to be taken
    pub fn read_position(&self) -> u64 {
        self.read_position
    }

    /// Lead time granted to new sources, in samples
    pub fn nominal_len(&self) -> usize {
        self.nominal_len
    }

    /// Ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.ring.len()
    }

    /// Get statistics
    pub fn stats(&self) -> MixerStats {
        MixerStats {
            tracked_sources: self.sources.len(),
            ..self.stats.clone()
        }
    }
}

/// Add little-endian PCM16 `source` bytes onto `target` with int16 saturation
fn mix_into(target: &mut [i16], source: &[u8]) {
    for (target, bytes) in target.iter_mut().zip(source.chunks_exact(2)) {
        let sample = i16::from_le_bytes([bytes[0], bytes[1]]) as i32;
        *target = (*target as i32 + sample).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn packet(sequence: i32, samples: &[i16]) -> Vec<u8> {
        let mut packet = sequence.to_be_bytes().to_vec();
        for sample in samples {
            packet.extend_from_slice(&sample.to_le_bytes());
        }
        packet
    }

    fn take(mixer: &mut AudioMixer, len: usize) -> Vec<i16> {
        let mut out = vec![0i16; len];
        mixer.take(&mut out);
        out
    }

    #[test]
    fn test_new_source_gets_lead_time() {
        let mut mixer = AudioMixer::with_samples(8);
        mixer.append(addr(1), &packet(0, &[5, 6, 7]));

        assert!(mixer.has_data());
        assert_eq!(take(&mut mixer, 8), vec![0; 8]);
        assert_eq!(take(&mut mixer, 4), vec![5, 6, 7, 0]);
    }

    #[test]
    fn test_sizes_ring_from_milliseconds() {
        let mixer = AudioMixer::new(100);
        assert_eq!(mixer.nominal_len(), 1600);
        assert_eq!(mixer.capacity(), 3200);
    }

    #[test]
    fn test_short_packet_dropped() {
        let mut mixer = AudioMixer::with_samples(8);
        mixer.append(addr(1), &[0, 0, 1]);

        assert!(!mixer.has_data());
        assert_eq!(mixer.stats().packets_invalid, 1);
    }

    #[test]
    fn test_header_only_packet_starts_tracking() {
        let mut mixer = AudioMixer::with_samples(8);
        mixer.append(addr(1), &packet(3, &[]));

        assert_eq!(
            mixer.source(&addr(1)),
            Some(SourceCursor { write_position: 8, last_sequence: 3 })
        );
    }

    #[test]
    fn test_late_packet_dropped_buffer_unchanged() {
        let mut mixer = AudioMixer::with_samples(4);
        mixer.append(addr(1), &packet(5, &[1, 1]));
        let cursor = mixer.source(&addr(1));

        mixer.append(addr(1), &packet(4, &[9, 9]));
        assert_eq!(mixer.source(&addr(1)), cursor);
        assert_eq!(mixer.stats().packets_dropped_late, 1);

        assert_eq!(take(&mut mixer, 4), vec![0; 4]);
        assert_eq!(take(&mut mixer, 4), vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_equal_sequence_accepted() {
        let mut mixer = AudioMixer::with_samples(4);
        mixer.append(addr(1), &packet(2, &[1]));
        mixer.append(addr(1), &packet(2, &[2]));

        assert_eq!(mixer.source(&addr(1)).map(|c| c.write_position), Some(6));
    }

    #[test]
    fn test_saturating_mix() {
        let mut mixer = AudioMixer::with_samples(2);
        mixer.append(addr(1), &packet(0, &[30000, -30000]));
        mixer.append(addr(2), &packet(0, &[10000, -10000]));

        take(&mut mixer, 2);
        assert_eq!(take(&mut mixer, 2), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_overflow_keeps_tail_of_packet() {
        let mut mixer = AudioMixer::with_samples(4);
        // Lead time 4, capacity 8: only 4 samples fit ahead of the cursor.
        mixer.append(addr(1), &packet(0, &[1, 2, 3, 4, 5, 6]));

        assert_eq!(mixer.stats().samples_truncated, 2);
        take(&mut mixer, 4);
        assert_eq!(take(&mut mixer, 4), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_full_source_drops_packet() {
        let mut mixer = AudioMixer::with_samples(4);
        mixer.append(addr(1), &packet(0, &[1, 1, 1, 1]));
        mixer.append(addr(1), &packet(1, &[2]));

        assert_eq!(mixer.stats().packets_dropped_overflow, 1);
        assert_eq!(mixer.source(&addr(1)).map(|c| c.last_sequence), Some(0));
    }

    #[test]
    fn test_mix_wraps_around_ring() {
        let mut mixer = AudioMixer::with_samples(4);
        take(&mut mixer, 2);
        // Source starts at ring index 6; four samples wrap past the end.
        mixer.append(addr(1), &packet(0, &[1, 2, 3, 4]));

        assert_eq!(take(&mut mixer, 4), vec![0; 4]);
        assert_eq!(take(&mut mixer, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_take_zeroes_ring() {
        let mut mixer = AudioMixer::with_samples(2);
        mixer.append(addr(1), &packet(0, &[7, 7]));
        take(&mut mixer, 4);

        // Same ring slots, a lap later.
        mixer.append(addr(2), &packet(0, &[1, 1]));
        take(&mut mixer, 2);
        assert_eq!(take(&mut mixer, 2), vec![1, 1]);
    }

    #[test]
    fn test_silent_source_evicted() {
        let mut mixer = AudioMixer::with_samples(4);
        mixer.append(addr(1), &packet(0, &[1, 1]));

        take(&mut mixer, 6);
        assert!(mixer.has_data());
        take(&mut mixer, 1);
        assert!(!mixer.has_data());
        assert_eq!(mixer.stats().sources_evicted, 1);

        // Re-acquires a full lead time, and may restart its sequence.
        mixer.append(addr(1), &packet(0, &[3]));
        assert_eq!(
            mixer.source(&addr(1)),
            Some(SourceCursor { write_position: 7 + 4 + 1, last_sequence: 0 })
        );
    }

    #[test]
    fn test_reset() {
        let mut mixer = AudioMixer::with_samples(4);
        mixer.append(addr(1), &packet(0, &[4, 4, 4]));
        take(&mut mixer, 3);
        mixer.reset();

        assert!(!mixer.has_data());
        assert_eq!(mixer.read_position(), 0);
        assert_eq!(take(&mut mixer, 8), vec![0; 8]);
    }
}

//! Fixed-capacity circular byte buffer
//!
//! Writes never block and never fail: when a write does not fit, the oldest
//! unread bytes are discarded to make room. Used for the playback reference
//! feed, where only the most recent audio is of any use.

/// Overwrite-on-full ring buffer of bytes
pub struct RingBuffer {
    buffer: Vec<u8>,
    /// Offset of the first unread byte
    offset: usize,
    /// Number of unread bytes
    available: usize,
    /// Bytes discarded because of overflow
    overflow_count: usize,
}

impl RingBuffer {
    /// Create a new ring buffer holding up to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be positive");

        Self {
            buffer: vec![0u8; capacity],
            offset: 0,
            available: 0,
            overflow_count: 0,
        }
    }

    /// Append `data`, dropping the oldest unread bytes if it doesn't fit.
    ///
    /// If `data` is longer than the whole buffer only its tail is kept.
    pub fn write(&mut self, data: &[u8]) {
        let capacity = self.buffer.len();
        let data = if data.len() > capacity {
            self.overflow_count += self.skip(self.available) + data.len() - capacity;
            &data[data.len() - capacity..]
        } else {
            data
        };
        if data.is_empty() {
            return;
        }

        let free = capacity - self.available;
        if data.len() > free {
            let overflow = data.len() - free;
            self.offset = (self.offset + overflow) % capacity;
            self.available -= overflow;
            self.overflow_count += overflow;
        }

        let write_offset = (self.offset + self.available) % capacity;
        let first = data.len().min(capacity - write_offset);

        self.buffer[write_offset..write_offset + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            let second = data.len() - first;
            self.buffer[..second].copy_from_slice(&data[first..]);
        }

        self.available += data.len();
    }

    /// Read and remove up to `out.len()` bytes; returns the count read
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let capacity = self.buffer.len();
        let read = out.len().min(self.available);
        if read == 0 {
            return 0;
        }

        let first = read.min(capacity - self.offset);
        out[..first].copy_from_slice(&self.buffer[self.offset..self.offset + first]);
        if first < read {
            let second = read - first;
            out[first..read].copy_from_slice(&self.buffer[..second]);
        }

        self.offset = (self.offset + read) % capacity;
        self.available -= read;
        read
    }

    /// Discard up to `len` unread bytes; returns the count skipped
    pub fn skip(&mut self, len: usize) -> usize {
        let skip = len.min(self.available);
        if skip == 0 {
            return 0;
        }

        self.offset = (self.offset + skip) % self.buffer.len();
        self.available -= skip;
        skip
    }

    /// Number of unread bytes
    pub fn available(&self) -> usize {
        self.available
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes lost to overflow since creation
    pub fn overflow_count(&self) -> usize {
        self.overflow_count
    }

    /// Forget all unread bytes.
    ///
    /// Storage is left as is; stale bytes are unreachable because every read
    /// is bounded by [`available`](Self::available).
    pub fn reset(&mut self) {
        self.offset = 0;
        self.available = 0;
    }
}

// ABOUTME: Bounded tail buffer for hook stdout/stderr capture.
// ABOUTME: Keeps only the most recent bytes so chatty hooks cannot exhaust memory.

use std::collections::VecDeque;

/// Default capture limit per stream.
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Ring of the last `limit` bytes written to it.
#[derive(Debug, Clone, Default)]
pub struct TailBuffer {
    limit: usize,
    bytes: VecDeque<u8>,
    dropped: usize,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            bytes: VecDeque::with_capacity(limit.min(8 * 1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        // Only the tail of an oversized chunk can survive.
        let data = if data.len() > self.limit {
            self.dropped += data.len() - self.limit;
            &data[data.len() - self.limit..]
        } else {
            data
        };

        let overflow = (self.bytes.len() + data.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.bytes.drain(..overflow);
            self.dropped += overflow;
        }
        self.bytes.extend(data);
    }

    /// Number of bytes discarded from the front.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        let (front, back) = self.bytes.as_slices();
        let mut joined = Vec::with_capacity(self.bytes.len());
        joined.extend_from_slice(front);
        joined.extend_from_slice(back);
        String::from_utf8_lossy(&joined).into_owned()
    }

    /// Move the contents out, leaving an empty buffer with the same limit.
    pub fn take(&mut self) -> TailBuffer {
        let limit = self.limit;
        std::mem::replace(self, TailBuffer::new(limit))
    }
}

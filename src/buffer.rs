//! Reusable byte-buffer pool for connection read and write paths.

use crate::limits::{ReqLimits, RespLimits};
use crossbeam::queue::ArrayQueue;

/// Thread-safe pool of reusable `Vec<u8>` buffers.
///
/// Workers acquire one read and one write buffer per connection and return
/// them when the connection closes. The pool is capped: acquisitions beyond
/// the cap fall back to a fresh allocation, and releases into a full pool
/// drop the buffer. Buffers that grew past the retention threshold while in
/// use are shrunk back before being pooled again.
pub(crate) struct BufferPool {
    buffers: ArrayQueue<Vec<u8>>,
    initial_capacity: usize,
    max_retained_capacity: usize,
}

impl BufferPool {
    pub(crate) fn new(slots: usize, initial_capacity: usize, max_retained_capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(slots.max(1)),
            initial_capacity,
            max_retained_capacity,
        }
    }

    /// Pool sized for the read path: one buffer per worker.
    pub(crate) fn for_reads(workers: usize, limits: &ReqLimits) -> Self {
        Self::new(workers, limits.read_buffer_size, limits.max_preamble_bytes)
    }

    /// Pool sized for the write path: one buffer per worker.
    pub(crate) fn for_writes(workers: usize, limits: &RespLimits) -> Self {
        Self::new(workers, limits.write_buffer_size, limits.max_buffer_capacity)
    }

    pub(crate) fn acquire(&self) -> Vec<u8> {
        match self.buffers.pop() {
            Some(buffer) => buffer,
            None => Vec::with_capacity(self.initial_capacity),
        }
    }

    pub(crate) fn release(&self, mut buffer: Vec<u8>) {
        buffer.clear();
        if buffer.capacity() > self.max_retained_capacity {
            buffer = Vec::with_capacity(self.initial_capacity);
        }
        // Full pool: let the buffer drop.
        let _ = self.buffers.push(buffer);
    }
}

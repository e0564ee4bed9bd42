//! Fixed-Capacity I/O Buffer
//!
//! This module provides the byte buffer that backs every connection's input
//! and output side. TCP is a stream protocol - a single read may deliver a
//! partial request, several requests back to back, or a request straddling
//! two reads - so the buffer keeps two independent cursors:
//!
//! ```text
//!   0          read_pos           write_pos         capacity
//!   |-- consumed --|---- filled ----|---- unfilled ----|
//! ```
//!
//! The socket layer reads directly into `unfilled()` and writes directly
//! from `filled()`, so no intermediate copy sits between the OS and the
//! codec. The capacity is fixed: a request or response that does not fit is
//! a protocol violation, not a reason to grow.

use std::fmt;

use thiserror::Error;

/// Returned when an append would run past the buffer's fixed capacity.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("buffer capacity {capacity} exceeded (need {needed} more bytes)")]
pub struct CapacityError {
    /// The fixed capacity of the buffer.
    pub capacity: usize,
    /// How many bytes the rejected append still required.
    pub needed: usize,
}

/// A fixed-capacity byte buffer with independent read and write cursors.
///
/// Bytes between the cursors (`filled()`) have been produced but not yet
/// consumed. The region past the write cursor (`unfilled()`) is free space
/// for the next socket read or codec append.
pub struct ByteBuffer {
    buf: Box<[u8]>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    /// Creates a zeroed buffer with the given fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// The fixed capacity this buffer was created with.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The produced-but-unconsumed region, `[read_pos, write_pos)`.
    pub fn filled(&self) -> &[u8] {
        &self.buf[self.read_pos..self.write_pos]
    }

    /// Number of bytes currently in the filled region.
    pub fn filled_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// True when every produced byte has been consumed.
    pub fn is_drained(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// The writable tail, `[write_pos, capacity)`.
    ///
    /// The socket layer reads straight into this slice and then commits
    /// with [`advance_filled`](Self::advance_filled).
    pub fn unfilled(&mut self) -> &mut [u8] {
        &mut self.buf[self.write_pos..]
    }

    /// Free space left past the write cursor.
    pub fn remaining_capacity(&self) -> usize {
        self.buf.len() - self.write_pos
    }

    /// Commits `n` bytes written into [`unfilled`](Self::unfilled).
    ///
    /// `n` must not exceed [`remaining_capacity`](Self::remaining_capacity);
    /// the commit is capped there since the slice handed out could not have
    /// held more.
    pub fn advance_filled(&mut self, n: usize) {
        self.write_pos = (self.write_pos + n).min(self.buf.len());
    }

    /// Consumes `n` bytes from the front of the filled region.
    ///
    /// When the buffer drains completely both cursors snap back to zero so
    /// the full capacity is available again without a copy.
    pub fn consume(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.write_pos);
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Moves the filled region to the start of the buffer, reclaiming the
    /// space held by already-consumed bytes.
    ///
    /// Needed when a request was consumed but the tail of a pipelined next
    /// request remains buffered.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.buf.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Resets both cursors, discarding any filled bytes.
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Appends a slice after the write cursor.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<(), CapacityError> {
        let free = self.remaining_capacity();
        if src.len() > free {
            return Err(CapacityError {
                capacity: self.buf.len(),
                needed: src.len() - free,
            });
        }
        self.buf[self.write_pos..self.write_pos + src.len()].copy_from_slice(src);
        self.write_pos += src.len();
        Ok(())
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("capacity", &self.buf.len())
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .finish()
    }
}

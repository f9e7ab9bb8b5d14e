//! Fixed-capacity read/write byte buffers for a single node.
//!
//! Unlike a shared buffer pool for thousands of ephemeral server-side
//! connections, the pool here has one read buffer and one write buffer per
//! configured node, allocated once at construction and reused for the
//! lifetime of that node's socket (and across reconnects).

/// A fixed-capacity buffer accumulating bytes read from the wire.
///
/// `filled` marks how much of `data` holds bytes not yet handed to the
/// current read operation. Bytes at `data[..filled]` are valid; the rest is
/// stale.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Vec<u8>,
    filled: usize,
}

impl ReadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    /// The slice a `read()` syscall should fill next.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.filled..]
    }

    /// Record that `n` more bytes were read into the spare region.
    pub fn advance_filled(&mut self, n: usize) {
        self.filled += n;
        debug_assert!(self.filled <= self.data.len());
    }

    /// The bytes available to feed to the current read operation.
    pub fn filled_slice(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// Drop the first `consumed` bytes, shifting any remainder to the front.
    pub fn consume(&mut self, consumed: usize) {
        debug_assert!(consumed <= self.filled);
        if consumed == 0 {
            return;
        }
        self.data.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
    }

}

/// A fixed-capacity buffer holding bytes queued for writing.
///
/// `len` is the number of valid bytes in `data`; `pos` is how many of those
/// have already been handed to the socket. `to_write() == len - pos`,
/// matching the spec's `toWrite`.
#[derive(Debug)]
pub struct WriteBuffer {
    data: Vec<u8>,
    len: usize,
    pos: usize,
}

impl WriteBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes remaining to be written to the socket.
    pub fn to_write(&self) -> usize {
        self.len - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.to_write() == 0
    }

    /// The unsent suffix of the buffer, ready to hand to a socket write.
    pub fn unsent(&self) -> &[u8] {
        &self.data[self.pos..self.len]
    }

    /// Record that `n` bytes were successfully written to the socket.
    pub fn advance_written(&mut self, n: usize) {
        self.pos += n;
        debug_assert!(self.pos <= self.len, "toWrite went negative");
        if self.pos == self.len {
            self.pos = 0;
            self.len = 0;
        }
    }

    /// Spare capacity available for appending more operation bytes.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    pub fn spare_len(&self) -> usize {
        self.data.len() - self.len
    }

    /// Record that `n` more bytes were appended to the spare region.
    pub fn advance_len(&mut self, n: usize) {
        self.len += n;
        debug_assert!(self.len <= self.data.len());
    }

    /// Compact any already-written prefix back to the front, making room
    /// for more operation bytes. Called before a fresh `fill_write_buffer`
    /// pass when the buffer isn't empty but has spare room at the front.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.data.copy_within(self.pos..self.len, 0);
        self.len -= self.pos;
        self.pos = 0;
    }

    /// Reset to empty, discarding any unsent bytes. Used when a connection
    /// is torn down for reconnect.
    pub fn reset(&mut self) {
        self.len = 0;
        self.pos = 0;
    }
}

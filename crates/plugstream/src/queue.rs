//! Owned buffer of pending bytes with a cursor.

use bytes::Bytes;

/// The currently queued byte range of a stream.
///
/// Holds at most one chunk at a time; a new chunk may only be loaded once
/// the previous one has fully drained.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunk: Bytes,
    pos: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fresh chunk. The previous chunk must be drained.
    pub fn load(&mut self, chunk: Bytes) {
        debug_assert!(self.is_drained(), "loading over undrained queue");
        self.chunk = chunk;
        self.pos = 0;
    }

    /// Bytes not yet accepted by the consumer.
    pub fn pending(&self) -> &[u8] {
        &self.chunk[self.pos..]
    }

    pub fn remaining(&self) -> usize {
        self.chunk.len() - self.pos
    }

    pub fn is_drained(&self) -> bool {
        self.pos >= self.chunk.len()
    }

    /// Advance the cursor past `n` accepted bytes.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.pos += n.min(self.remaining());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_steps() {
        let mut q = ByteQueue::new();
        assert!(q.is_drained());

        q.load(Bytes::from_static(b"abcdef"));
        assert_eq!(q.remaining(), 6);
        assert_eq!(q.pending(), b"abcdef");

        q.advance(2);
        assert_eq!(q.pending(), b"cdef");
        assert!(!q.is_drained());

        q.advance(4);
        assert!(q.is_drained());
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn reload_after_drain() {
        let mut q = ByteQueue::new();
        q.load(Bytes::from_static(b"xy"));
        q.advance(2);
        q.load(Bytes::from_static(b"z"));
        assert_eq!(q.pending(), b"z");
    }
}

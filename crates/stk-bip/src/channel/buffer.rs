//! Per-channel receive and transmit buffers.
//!
//! Both are bounded by the negotiated buffer size. Neither ever grows past
//! it: excess input is dropped by the caller's choice of length.

use bytes::{Bytes, BytesMut};

/// Bytes queued by SEND DATA until they are flushed to the socket.
#[derive(Debug)]
pub struct TxBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl TxBuffer {
    /// An empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `data` as fits. Returns the number of bytes taken.
    pub fn append(&mut self, data: &[u8]) -> usize {
        let take = data.len().min(self.free_space());
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Bytes that can still be appended.
    pub fn free_space(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Bytes waiting to be flushed.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take everything queued, leaving the buffer empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Discard everything queued.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Bytes read from the socket until RECEIVE DATA hands them to the card.
#[derive(Debug)]
pub struct RxBuffer {
    buf: BytesMut,
    capacity: usize,
}

impl RxBuffer {
    /// An empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Store as much of `data` as fits. Returns the number of bytes stored.
    pub fn store(&mut self, data: &[u8]) -> usize {
        let room = self.capacity - self.buf.len();
        let take = data.len().min(room);
        self.buf.extend_from_slice(&data[..take]);
        take
    }

    /// Bytes waiting for the card.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Remove and return the first `count` bytes (fewer if fewer are held).
    pub fn read(&mut self, count: usize) -> Bytes {
        let count = count.min(self.buf.len());
        self.buf.split_to(count).freeze()
    }

    /// Discard everything held.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_truncates_at_capacity() {
        let mut tx = TxBuffer::new(256);
        assert_eq!(tx.append(&[0x11; 300]), 256);
        assert_eq!(tx.free_space(), 0);
        assert_eq!(tx.append(&[0x22]), 0);
        assert_eq!(tx.take().len(), 256);
        assert_eq!(tx.free_space(), 256);
    }

    #[test]
    fn tx_accumulates_until_taken() {
        let mut tx = TxBuffer::new(10);
        tx.append(b"abc");
        tx.append(b"def");
        assert_eq!(tx.len(), 6);
        assert_eq!(&tx.take()[..], b"abcdef");
        assert!(tx.is_empty());
    }

    #[test]
    fn rx_reads_in_order() {
        let mut rx = RxBuffer::new(8);
        assert_eq!(rx.store(b"0123456789"), 8);
        assert_eq!(&rx.read(3)[..], b"012");
        assert_eq!(rx.available(), 5);
        assert_eq!(&rx.read(100)[..], b"34567");
        assert!(rx.is_empty());
        assert_eq!(rx.store(b"ab"), 2);
        rx.reset();
        assert!(rx.is_empty());
    }
}

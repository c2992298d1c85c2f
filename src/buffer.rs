//! Receive buffer for the frame codec

use crate::{
    constants::{BUF_CHUNK, MAX_BUFFER_SIZE},
    error::{AmiError, AmiResult},
};

/// Growable byte buffer with a consumed-prefix cursor.
///
/// Bytes are appended at the tail and consumed from the head. Consumed bytes
/// stay in place until [`compact`](Self::compact) moves the live tail to the
/// front, so a partial frame is never copied more than once per read.
#[derive(Debug)]
pub struct AmiBuffer {
    data: Vec<u8>,
    position: usize,
}

impl AmiBuffer {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(BUF_CHUNK),
            position: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        let spare = self.data.capacity() - self.data.len();
        if spare < bytes.len() {
            self.data
                .reserve(bytes.len().max(BUF_CHUNK));
        }
        self.data
            .extend_from_slice(bytes);
    }

    /// Unconsumed bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[self.position..]
    }

    /// Number of unconsumed bytes.
    pub fn len(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark `count` bytes at the head as consumed.
    pub fn advance(&mut self, count: usize) {
        self.position = (self.position + count).min(self.data.len());
    }

    /// Find `pattern` in the unconsumed bytes, returning its offset.
    pub fn find(&self, pattern: &[u8]) -> Option<usize> {
        if pattern.is_empty() {
            return None;
        }
        self.data()
            .windows(pattern.len())
            .position(|window| window == pattern)
    }

    /// Drop consumed bytes and move the live tail to the front.
    pub fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        if self.position == self.data.len() {
            self.data.clear();
        } else {
            self.data
                .drain(..self.position);
        }
        self.position = 0;
    }

    /// Fail when the unconsumed data exceeds [`MAX_BUFFER_SIZE`].
    pub fn check_size_limits(&self) -> AmiResult<()> {
        let size = self.len();
        if size > MAX_BUFFER_SIZE {
            return Err(AmiError::BufferOverflow {
                size,
                limit: MAX_BUFFER_SIZE,
            });
        }
        Ok(())
    }
}

impl Default for AmiBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_and_compact() {
        let mut buffer = AmiBuffer::new();
        buffer.extend_from_slice(b"abcdef");
        buffer.advance(2);
        assert_eq!(buffer.data(), b"cdef");

        buffer.compact();
        assert_eq!(buffer.data(), b"cdef");
        assert_eq!(buffer.len(), 4);

        buffer.advance(10);
        assert!(buffer.is_empty());
        buffer.compact();
        assert!(buffer.is_empty());
    }

    #[test]
    fn find_pattern_in_unconsumed_region() {
        let mut buffer = AmiBuffer::new();
        buffer.extend_from_slice(b"\r\n\r\nA: 1\r\n\r\n");
        buffer.advance(4);
        assert_eq!(buffer.find(b"\r\n\r\n"), Some(4));
        assert_eq!(buffer.find(b"zz"), None);
    }

    #[test]
    fn size_limit_enforced() {
        let mut buffer = AmiBuffer::new();
        buffer.extend_from_slice(&vec![b'x'; MAX_BUFFER_SIZE + 1]);
        assert!(matches!(
            buffer.check_size_limits(),
            Err(AmiError::BufferOverflow { .. })
        ));
    }
}

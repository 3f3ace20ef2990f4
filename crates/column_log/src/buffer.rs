//! An append-only byte buffer that remembers where its lines end.

use std::{borrow::Cow, fmt, io};

use crate::{LoggerError, queue::MIN_CAPACITY};

/// Approximate number of bytes a single rendered attribute line takes.
const BYTES_PER_LINE: usize = 50;

/// A growable byte buffer that records the offset of every newline written into it.
///
/// Besides appending, it allows overwriting already written bytes in place with
/// [`LineBuffer::write_at`], which is used to fill in column padding after the fact.
/// The recorded newline offsets are bookkeeping only and never change what gets written.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    newlines: Vec<usize>,
}

impl LineBuffer {
    /// Creates a buffer sized for roughly `lines` lines of output.
    pub fn with_capacity(lines: usize) -> Self {
        let lines = lines.max(MIN_CAPACITY);
        Self {
            buf: Vec::with_capacity(BYTES_PER_LINE * lines),
            newlines: Vec::with_capacity(lines),
        }
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the absolute offsets of all newline bytes appended to the buffer.
    pub fn newlines(&self) -> &[usize] {
        &self.newlines
    }

    /// Returns the written bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the written bytes as text, borrowing whenever they are valid UTF-8.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.buf)
    }

    /// Appends `bytes` to the buffer.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let offset = self.buf.len();
        self.newlines.extend(
            bytes
                .iter()
                .enumerate()
                .filter(|(_, byte)| **byte == b'\n')
                .map(|(i, _)| offset + i),
        );
        self.buf.extend_from_slice(bytes);
    }

    /// Appends `s` to the buffer.
    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Appends `n` copies of `byte` to the buffer.
    pub fn write_repeated(&mut self, byte: u8, n: usize) {
        if byte == b'\n' {
            let offset = self.buf.len();
            self.newlines.extend((0..n).map(|i| offset + i));
        }
        self.buf.resize(self.buf.len() + n, byte);
    }

    /// Overwrites the bytes starting at `offset` with `bytes`, returning how many were written.
    ///
    /// Bytes that would land past the current end of the buffer are dropped, the buffer never
    /// grows here. Newline offsets are not updated.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::InvalidOffset`] if `offset` lies past the end of the buffer.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<usize, LoggerError> {
        let len = self.buf.len();
        let Some(dst) = self.buf.get_mut(offset..) else {
            return Err(LoggerError::InvalidOffset { offset, len });
        };

        let n = bytes.len().min(dst.len());
        if let (Some(dst), Some(src)) = (dst.get_mut(..n), bytes.get(..n)) {
            dst.copy_from_slice(src);
        }
        Ok(n)
    }

    /// Shortens the buffer to `len` bytes, forgetting the newlines past that point.
    ///
    /// Has no effect if the buffer is not longer than `len`.
    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
        while self.newlines.last().is_some_and(|&offset| offset >= len) {
            self.newlines.pop();
        }
    }

    /// Makes sure at least `n` more bytes fit without reallocating.
    ///
    /// When the buffer has to grow, it grows to twice its capacity plus `n`.
    pub fn grow(&mut self, n: usize) {
        let spare = self.buf.capacity() - self.buf.len();
        if spare < n {
            let target = 2 * self.buf.capacity() + n;
            self.buf.reserve_exact(target - self.buf.len());
        }
    }
}

impl io::Write for LineBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

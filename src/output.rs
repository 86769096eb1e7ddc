use std::io::{self, Write};

/// Writer that tracks how many bytes have landed in the underlying stream so
/// callers can record byte ranges for the table of contents.
pub struct ByteCountWriter<W: Write> {
    inner: W,
    byte_count: u64,
}

impl<W: Write> ByteCountWriter<W> {
    pub fn new(inner: W) -> Self { Self { inner, byte_count: 0 } }

    /// Bytes written so far.
    pub fn byte_count(&self) -> u64 { self.byte_count }

    pub fn get_ref(&self) -> &W { &self.inner }

    pub fn into_inner(self) -> W { self.inner }
}

impl<W: Write> Write for ByteCountWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.byte_count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> { self.inner.flush() }
}

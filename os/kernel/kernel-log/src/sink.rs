use core::fmt::{self, Write};

/// Destination for formatted log output.
///
/// Implementations must not allocate and must tolerate being called with
/// interrupts masked.
pub trait LogSink {
    fn write_bytes(&self, bytes: &[u8]);
}

impl<S: LogSink + ?Sized> LogSink for &S {
    fn write_bytes(&self, bytes: &[u8]) {
        (**self).write_bytes(bytes);
    }
}

/// Adapts a [`LogSink`] to [`fmt::Write`].
pub struct SinkWriter<'a, S: LogSink + ?Sized>(pub &'a S);

impl<S: LogSink + ?Sized> Write for SinkWriter<'_, S> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_bytes(s.as_bytes());
        Ok(())
    }

    #[inline]
    fn write_char(&mut self, c: char) -> fmt::Result {
        // UTF-8 encode without allocation.
        let mut buf = [0u8; 4];
        self.write_str(c.encode_utf8(&mut buf))
    }
}

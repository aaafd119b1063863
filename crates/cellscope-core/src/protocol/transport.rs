//! Byte transport abstraction
//!
//! The session and prober operate on any bidirectional byte transport, not
//! just a serial port. Tests run against in-memory implementations; the
//! production implementation is [`super::serial::SerialTransport`].

use std::future::Future;
use std::io;

/// A bidirectional, chunk-oriented byte transport.
///
/// A transport is an exclusively-owned resource: exactly one session (or
/// one probe) may hold it at a time, and it must be closed (or dropped)
/// when that holder is done with it.
pub trait Transport: Send {
    /// Write the entire buffer to the device
    fn write_bytes(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Read whatever bytes are available, up to `buf.len()`, waiting for at
    /// least one byte. Returns the number of bytes read; 0 means the
    /// transport reached end-of-stream.
    fn read_chunk(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Release the underlying endpoint. Dropping the transport must also
    /// release it; this exists so callers can observe close failures.
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

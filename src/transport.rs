//! Byte transport underneath the protocol driver
//!
//! The driver only needs to open and close a connection and move raw bytes.
//! Port naming, baud rate and the actual device I/O belong to the
//! implementation.

use core::fmt::Debug;
use core::time::Duration;

/// A serial-like connection carrying the framed byte stream
///
/// An implementation holds at most one connection. `open` on an open
/// transport may either succeed or fail, the driver never calls it twice
/// without a `close` in between.
pub trait Transport {
    /// Error type for every operation
    type Error: Debug;

    /// Establish the connection to `port`
    fn open(&mut self, port: &str) -> Result<(), Self::Error>;

    /// Release the connection
    fn close(&mut self) -> Result<(), Self::Error>;

    /// True while a connection is established
    fn is_open(&self) -> bool;

    /// Read up to `buf.len()` bytes
    ///
    /// Waits at most `timeout` for data and returns the number of bytes
    /// read, which may be zero.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;

    /// Write all of `bytes`
    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn open(&mut self, port: &str) -> Result<(), Self::Error> {
        (**self).open(port)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error> {
        (**self).read(buf, timeout)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        (**self).write(bytes)
    }
}

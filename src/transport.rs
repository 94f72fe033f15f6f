//! The byte-level link to the boot-loader.
//!
//! Nothing in the boot-loader handshake or the Xmodem engine knows about
//! serial ports. They only push bytes out and pull single bytes in with a
//! timeout, through the [`Transport`] trait. The implementation over a
//! [`SerialPort`](serialport::SerialPort) lives in `utils::ports`.

use std::{io, time::Duration};

/// A byte pipe to the device, exclusively owned for the duration of a
/// transfer.
pub trait Transport {
    /// Write all of `bytes` to the device.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for a single byte. `Ok(None)` means the timeout
    /// expired without any data.
    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<u8>>;
}

//! Serial transport abstraction: the two halves of the modem UART.
//!
//! The receive half is a separate type so that ownership enforces the
//! single-reader rule: exactly one [`SerialRx`] exists per link and it is
//! moved into the reader task.  Everything else shares the [`SerialTx`]
//! half through the link context.
//!
//! Concrete implementations:
//! - ESP-IDF `UartDriver` halves (`adapters::uart`, target only)
//! - Simulated ESP-AT modem (`adapters::sim_modem`, host only)

/// Receive half of a serial port.
pub trait SerialRx {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Read up to `buf.len()` bytes into `buf`.
    /// Returns 0 if no data is available (non-blocking).
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Transmit half of a serial port.
pub trait SerialTx {
    /// Error type for this transport.
    type Error: core::fmt::Debug;

    /// Write `data` to the transport.
    /// Returns the number of bytes actually written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Write the whole of `data`, retrying short writes.
///
/// A transport that accepts zero bytes is treated as failed so a wedged
/// driver cannot spin the caller forever.
pub fn write_all<T: SerialTx>(tx: &mut T, mut data: &[u8]) -> Result<(), Option<T::Error>> {
    while !data.is_empty() {
        match tx.write(data) {
            Ok(0) => return Err(None),
            Ok(n) => data = &data[n.min(data.len())..],
            Err(e) => return Err(Some(e)),
        }
    }
    tx.flush().map_err(Some)
}

/// A null transport that discards all writes and never reads.
pub struct NullTransport;

impl SerialRx for NullTransport {
    type Error = ();

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> {
        Ok(0)
    }
}

impl SerialTx for NullTransport {
    type Error = ();

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }
}

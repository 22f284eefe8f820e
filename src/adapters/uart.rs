//! ESP-IDF UART adapter for the modem link.
//!
//! Wraps `UartDriver` for probing and splits it into the transmit half
//! (kept by the link context) and the receive half (moved into the reader
//! task).  Reads never block; the reader paces itself with a timer.

use esp_idf_hal::delay::{BLOCK, NON_BLOCK};
use esp_idf_hal::uart::{UartDriver, UartRxDriver, UartTxDriver};
use esp_idf_sys::EspError;

use crate::link::transport::{SerialRx, SerialTx};

/// Whole UART, used while probing and before the link starts.
pub struct EspUart<'d> {
    driver: UartDriver<'d>,
}

impl<'d> EspUart<'d> {
    pub fn new(driver: UartDriver<'d>) -> Self {
        Self { driver }
    }

    pub fn into_split(self) -> (EspUartTx<'d>, EspUartRx<'d>) {
        let (tx, rx) = self.driver.into_split();
        (EspUartTx { tx }, EspUartRx { rx })
    }
}

impl SerialRx for EspUart<'_> {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.driver.read(buf, NON_BLOCK)
    }
}

impl SerialTx for EspUart<'_> {
    type Error = EspError;

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        self.driver.write(data)
    }

    fn flush(&mut self) -> Result<(), EspError> {
        self.driver.wait_tx_done(BLOCK)
    }
}

pub struct EspUartTx<'d> {
    tx: UartTxDriver<'d>,
}

impl SerialTx for EspUartTx<'_> {
    type Error = EspError;

    fn write(&mut self, data: &[u8]) -> Result<usize, EspError> {
        self.tx.write(data)
    }

    fn flush(&mut self) -> Result<(), EspError> {
        self.tx.wait_done(BLOCK)
    }
}

pub struct EspUartRx<'d> {
    rx: UartRxDriver<'d>,
}

impl SerialRx for EspUartRx<'_> {
    type Error = EspError;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.rx.read(buf, NON_BLOCK)
    }
}

//! Modem enable/reset line.
//!
//! Hard recovery power-cycles the modem by pulling its enable pin low.
//! Any `embedded-hal` output pin works; on ESP-IDF that is a `PinDriver`.
//! Boards without the line wired use [`NoModemReset`], which makes the
//! watchdog fall back to repeated soft recovery.

use core::time::Duration;
use embedded_hal::digital::OutputPin;
use log::{info, warn};

use crate::error::LinkError;

/// Enable held low during a power cycle.
pub const RESET_PULSE: Duration = Duration::from_millis(300);

/// Time the modem firmware needs to boot after the enable rises.
pub const BOOT_WAIT: Duration = Duration::from_millis(1_200);

#[allow(async_fn_in_trait)]
pub trait ModemReset {
    /// Power-cycle the modem.
    async fn power_cycle(&mut self) -> Result<(), LinkError>;
}

/// Reset through a GPIO wired to the modem's enable (active high).
pub struct GpioModemReset<P: OutputPin> {
    pin: P,
    pulse: Duration,
    boot_wait: Duration,
}

impl<P: OutputPin> GpioModemReset<P> {
    pub fn new(pin: P) -> Self {
        Self::with_timing(pin, RESET_PULSE, BOOT_WAIT)
    }

    pub fn with_timing(pin: P, pulse: Duration, boot_wait: Duration) -> Self {
        Self {
            pin,
            pulse,
            boot_wait,
        }
    }
}

impl<P: OutputPin> ModemReset for GpioModemReset<P> {
    async fn power_cycle(&mut self) -> Result<(), LinkError> {
        info!("WDT: power-cycling modem");
        self.pin.set_low().map_err(|e| {
            warn!("WDT: modem enable low failed: {:?}", e);
            LinkError::ModemResetFailed
        })?;
        async_io_mini::Timer::after(self.pulse).await;
        self.pin.set_high().map_err(|e| {
            warn!("WDT: modem enable high failed: {:?}", e);
            LinkError::ModemResetFailed
        })?;
        async_io_mini::Timer::after(self.boot_wait).await;
        Ok(())
    }
}

/// No reset line wired.
pub struct NoModemReset;

impl ModemReset for NoModemReset {
    async fn power_cycle(&mut self) -> Result<(), LinkError> {
        Err(LinkError::ModemResetFailed)
    }
}

//! GPIO / peripheral pin assignments for the bridge board.
//!
//! Single source of truth for the board defaults in
//! [`LinkConfig`](crate::config::LinkConfig); a persisted configuration
//! may override them.

// ---------------------------------------------------------------------------
// Modem UART (ESP-AT co-processor)
// ---------------------------------------------------------------------------

/// UART peripheral wired to the modem.
pub const MODEM_UART_PORT: u8 = 1;
/// Host TX → modem RX.
pub const MODEM_TX_GPIO: i32 = 17;
/// Host RX ← modem TX.
pub const MODEM_RX_GPIO: i32 = 18;
/// ESP-AT factory default.
pub const MODEM_BAUD: u32 = 115_200;

// ---------------------------------------------------------------------------
// Modem power
// ---------------------------------------------------------------------------

/// Digital output to the modem's EN pin (active HIGH).  Pulled low to
/// power-cycle a wedged modem.
pub const MODEM_EN_GPIO: i32 = 4;

//! Adapters: concrete implementations of the link's boundary traits.
//!
//! | Adapter       | Implements           | Connects to                   |
//! |---------------|----------------------|-------------------------------|
//! | `uart`        | SerialRx / SerialTx  | ESP-IDF `UartDriver`          |
//! | `modem_reset` | ModemReset           | modem enable GPIO (`OutputPin`) |
//! | `sim_modem`   | SerialRx / SerialTx  | in-memory ESP-AT simulation   |

pub mod modem_reset;

#[cfg(not(target_os = "espidf"))]
pub mod sim_modem;

#[cfg(feature = "espidf")]
pub mod uart;

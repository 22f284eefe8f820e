//! Bridge configuration parameters
//!
//! All tunable parameters for the UART link to the ESP-AT modem.
//! Defaults follow what the modem firmware tolerates at 115200 baud;
//! a persisted blob (see [`LinkConfig::to_blob`]) overrides them.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::pins;

/// Build a fixed-capacity string, truncating nothing: over-long input
/// yields an empty string, which [`LinkConfig::validate`] rejects.
fn hs<const N: usize>(s: &str) -> heapless::String<N> {
    heapless::String::try_from(s).unwrap_or_default()
}

/// Physical UART attached to the modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartConfig {
    /// UART peripheral number.
    pub port: u8,
    pub baud: u32,
    /// Explicit pin mapping; `None` keeps the board default.
    pub tx_gpio: Option<i32>,
    pub rx_gpio: Option<i32>,
}

/// Static station address for the server role (`AT+CIPSTA`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIp {
    pub ip: heapless::String<16>,
    pub gateway: heapless::String<16>,
    pub netmask: heapless::String<16>,
}

/// Which end of the TCP connection the modem plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkRole {
    /// Single outbound connection (`CIPMUX=0`); may use transparent mode.
    Client { host: heapless::String<64>, port: u16 },
    /// Listening server (`CIPMUX=1`); every send names its link id.
    Server {
        port: u16,
        static_ip: Option<StaticIp>,
    },
}

/// Byte budget for one AT reply scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReaderBudget {
    /// Reply bytes consumed before giving up on a match.
    pub max_bytes: usize,
    /// Bytes pulled per read from the UART / reply transcript.
    pub chunk_size: usize,
    /// Lines longer than this are truncated.
    pub max_line_bytes: usize,
}

/// Core link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    // --- Hardware ---
    pub uart: UartConfig,
    /// Modem enable/reset GPIO used for hard recovery.
    pub modem_enable_gpio: Option<i32>,
    /// Candidate UART ports probed by autodetect.
    pub candidate_ports: heapless::Vec<u8, 4>,
    /// Candidate baud rates probed by autodetect.
    pub candidate_bauds: heapless::Vec<u32, 4>,

    // --- Network ---
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
    pub role: LinkRole,
    /// Use transparent streaming when the role allows it.
    pub prefer_transparent: bool,

    // --- Rate control ---
    /// Messages (AT commands + application sends) per second; 0 = unlimited.
    pub msg_per_sec: u32,
    /// Payload bytes per second in transparent mode; 0 = unlimited.
    pub bytes_per_sec: u32,
    /// Minimum gap between AT command writes (milliseconds).
    pub inter_cmd_gap_ms: u32,
    /// Concurrent in-flight application sends.
    pub max_inflight_sends: usize,

    // --- Watchdog ---
    pub watchdog_enabled: bool,
    pub watchdog_check_ms: u32,
    pub watchdog_idle_ms: u32,
    /// Consecutive failed soft recoveries before a hard reset.
    pub max_fails_before_hard: u8,

    // --- Reader ---
    pub line_reader: LineReaderBudget,
    /// UART poll interval when no bytes are pending (milliseconds).
    pub poll_interval_ms: u32,
    /// Largest `+IPD` payload accepted.
    pub max_frame_bytes: usize,

    // --- Timing ---
    /// Silence required around the `+++` escape (milliseconds).
    pub escape_guard_ms: u32,
    pub command_timeout_ms: u32,
    /// `AT+CWJAP` can take several seconds on a busy AP.
    pub join_timeout_ms: u32,
    /// Wait for the `>` prompt after `AT+CIPSEND`.
    pub prompt_timeout_ms: u32,
    /// Wait for `SEND OK` / `SEND FAIL` after the payload.
    pub send_ack_timeout_ms: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        let mut candidate_ports = heapless::Vec::new();
        for p in [0u8, 1, 2] {
            let _ = candidate_ports.push(p);
        }
        let mut candidate_bauds = heapless::Vec::new();
        for b in [115_200u32, 9_600, 230_400, 57_600] {
            let _ = candidate_bauds.push(b);
        }

        Self {
            // Hardware
            uart: UartConfig {
                port: pins::MODEM_UART_PORT,
                baud: pins::MODEM_BAUD,
                tx_gpio: Some(pins::MODEM_TX_GPIO),
                rx_gpio: Some(pins::MODEM_RX_GPIO),
            },
            modem_enable_gpio: Some(pins::MODEM_EN_GPIO),
            candidate_ports,
            candidate_bauds,

            // Network
            ssid: hs("esp-at-bridge"),
            password: hs("changeme-please"),
            role: LinkRole::Client {
                host: hs("192.168.1.100"),
                port: 8080,
            },
            prefer_transparent: true,

            // Rate control
            msg_per_sec: 10,
            bytes_per_sec: 2048,
            inter_cmd_gap_ms: 35,
            max_inflight_sends: 1,

            // Watchdog
            watchdog_enabled: true,
            watchdog_check_ms: 5_000,
            watchdog_idle_ms: 15_000,
            max_fails_before_hard: 3,

            // Reader
            line_reader: LineReaderBudget {
                max_bytes: 4096,
                chunk_size: 256,
                max_line_bytes: 512,
            },
            poll_interval_ms: 10,
            max_frame_bytes: 4096,

            // Timing
            escape_guard_ms: 1_200,
            command_timeout_ms: 5_000,
            join_timeout_ms: 20_000,
            prompt_timeout_ms: 5_000,
            send_ack_timeout_ms: 5_000,
        }
    }
}

impl LinkConfig {
    /// Reject parameter combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), Error> {
        if self.ssid.is_empty() {
            return Err(Error::Config("ssid must not be empty"));
        }
        if !(1..=4).contains(&self.max_inflight_sends) {
            return Err(Error::Config("max_inflight_sends must be 1..=4"));
        }
        if self.line_reader.chunk_size == 0 || self.line_reader.max_line_bytes == 0 {
            return Err(Error::Config("line reader sizes must be non-zero"));
        }
        if self.line_reader.max_bytes < self.line_reader.chunk_size {
            return Err(Error::Config("byte budget below chunk size"));
        }
        if self.watchdog_check_ms == 0 || self.watchdog_idle_ms == 0 {
            return Err(Error::Config("watchdog intervals must be non-zero"));
        }
        if self.max_fails_before_hard == 0 {
            return Err(Error::Config("max_fails_before_hard must be non-zero"));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll interval must be non-zero"));
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::Config("max_frame_bytes must be non-zero"));
        }
        if let LinkRole::Client { host, port } = &self.role {
            if host.is_empty() || *port == 0 {
                return Err(Error::Config("client target host/port missing"));
            }
        }
        Ok(())
    }

    /// Transparent streaming is only possible on a single-connection client.
    pub fn transparent_capable(&self) -> bool {
        self.prefer_transparent && matches!(self.role, LinkRole::Client { .. })
    }

    /// Bucket capacity for a rate: burst of two seconds' worth.
    pub fn burst_for(rate_per_sec: u32) -> u32 {
        rate_per_sec.saturating_mul(2)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms as u64)
    }

    pub fn escape_guard(&self) -> Duration {
        Duration::from_millis(self.escape_guard_ms as u64)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    /// Serialise for persistent storage.
    pub fn to_blob(&self) -> Result<Vec<u8>, Error> {
        postcard::to_allocvec(self).map_err(|_| Error::Config("config encode failed"))
    }

    /// Load from a persisted blob, validating before use.
    pub fn from_blob(bytes: &[u8]) -> Result<Self, Error> {
        let cfg: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("config blob corrupted"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

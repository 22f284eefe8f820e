//! UART autodetect: find the port and baud rate the modem answers on.
//!
//! Runs before the link context exists, so it drives a raw transport
//! directly: escape out of any data mode, send `AT`, and accept either
//! `OK` or `ERROR` as proof that an AT interpreter is listening.

use std::time::Instant;

use core::time::Duration;
use log::{debug, info, warn};

use super::demux::find;
use super::transport::{SerialRx, SerialTx, write_all};

const PROBE_REPLY_TIMEOUT: Duration = Duration::from_millis(500);
const PROBE_POLL: Duration = Duration::from_millis(10);

/// Probe one open port.  `true` if an AT interpreter replied.
pub async fn probe<P: SerialRx + SerialTx>(port: &mut P, guard: Duration) -> bool {
    async_io_mini::Timer::after(guard).await;
    if write_all(port, b"+++").is_err() {
        return false;
    }
    async_io_mini::Timer::after(guard).await;

    // Discard whatever the escape shook loose.
    let mut buf = [0u8; 128];
    while matches!(port.read(&mut buf), Ok(n) if n > 0) {}

    if write_all(port, b"AT\r\n").is_err() {
        return false;
    }

    let deadline = Instant::now() + PROBE_REPLY_TIMEOUT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match port.read(&mut buf) {
            Ok(0) => {
                async_io_mini::Timer::after(PROBE_POLL).await;
            }
            Ok(n) => {
                seen.extend_from_slice(&buf[..n]);
                if find(&seen, b"OK").is_some() || find(&seen, b"ERROR").is_some() {
                    return true;
                }
            }
            Err(e) => {
                debug!("BRINGUP: probe read error {:?}", e);
                return false;
            }
        }
    }
    false
}

/// Probe order: the configured value first, then the other candidates
/// without repeats.
pub fn candidates<T: Copy + PartialEq>(preferred: T, others: &[T]) -> Vec<T> {
    let mut out = vec![preferred];
    for &c in others {
        if !out.contains(&c) {
            out.push(c);
        }
    }
    out
}

/// Try every `(port, baud)` candidate; returns the first that answers.
///
/// `open` yields a transport for a candidate or `None` if the port cannot
/// be configured.
pub async fn autodetect<P, F>(
    ports: &[u8],
    bauds: &[u32],
    guard: Duration,
    mut open: F,
) -> Option<(u8, u32)>
where
    P: SerialRx + SerialTx,
    F: FnMut(u8, u32) -> Option<P>,
{
    for &port in ports {
        for &baud in bauds {
            let Some(mut uart) = open(port, baud) else {
                debug!("BRINGUP: UART{} @ {} unavailable", port, baud);
                continue;
            };
            if probe(&mut uart, guard).await {
                info!("BRINGUP: modem found on UART{} @ {} baud", port, baud);
                return Some((port, baud));
            }
        }
    }
    warn!("BRINGUP: no modem answered on any candidate UART");
    None
}

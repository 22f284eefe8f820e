//! The single long-lived link context.
//!
//! Owns everything whose correctness depends on there being exactly one
//! copy: the UART transmit half, the waiter registry, the mode, the
//! activity timestamps and the command lock.  Every task borrows the same
//! context; the receive half lives in the reader task alone.
//!
//! All interior mutability is `Cell`/`RefCell` because every task runs on
//! one cooperative executor.  A `RefCell` borrow is never held across an
//! `.await`.

use std::time::Instant;

use core::cell::{Cell, RefCell};
use core::time::Duration;
use embassy_sync::mutex::Mutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::semaphore::GreedySemaphore;
use log::{debug, info, warn};

use super::bucket::TokenBucket;
use super::channels::{InboundQueue, LinkMutex, OutboundQueue};
use super::mode::LinkState;
use super::transport::{SerialTx, write_all};
use super::waiters::WaiterRegistry;
use crate::config::LinkConfig;
use crate::error::LinkError;

/// Reply transcript capacity (lines captured for the active command).
pub const TRANSCRIPT_BYTES: usize = 1024;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_delivered: u32,
    pub frames_dropped: u32,
    pub malformed_headers: u32,
    pub sends_streamed: u32,
    pub sends_confirmed: u32,
    pub sends_unconfirmed: u32,
    pub sends_failed: u32,
    pub soft_recoveries: u32,
    pub hard_resets: u32,
}

pub struct LinkContext<T: SerialTx> {
    pub config: LinkConfig,
    tx: RefCell<T>,
    pub waiters: WaiterRegistry,

    // Watchdog counters
    last_tx: Cell<Instant>,
    last_rx: Cell<Instant>,

    state: Cell<LinkState>,
    transparent_wanted: Cell<bool>,

    /// One AT transaction at a time; holds the time of the last command write.
    pub(crate) command_lock: Mutex<LinkMutex, Option<Instant>>,
    /// In-flight application sends.  Mode transitions take every permit.
    pub(crate) send_permits: GreedySemaphore<LinkMutex>,

    /// One unit per AT command or application send.
    pub msg_bucket: TokenBucket,
    /// One unit per payload byte in transparent mode.
    pub byte_bucket: TokenBucket,

    /// Lines captured by the reader while a command session is open.
    pub(crate) transcript: Pipe<LinkMutex, TRANSCRIPT_BYTES>,
    capturing: Cell<bool>,
    resync: Cell<bool>,

    pub inbound: InboundQueue,
    pub outbound: OutboundQueue,

    stats: Cell<LinkStats>,
    watchdog_enabled: Cell<bool>,
}

impl<T: SerialTx> LinkContext<T> {
    pub fn new(config: LinkConfig, tx: T) -> Self {
        let now = Instant::now();
        Self {
            tx: RefCell::new(tx),
            waiters: WaiterRegistry::new(),
            last_tx: Cell::new(now),
            last_rx: Cell::new(now),
            state: Cell::new(LinkState::Command),
            transparent_wanted: Cell::new(config.transparent_capable()),
            command_lock: Mutex::new(None),
            send_permits: GreedySemaphore::new(config.max_inflight_sends),
            msg_bucket: TokenBucket::new(
                config.msg_per_sec,
                LinkConfig::burst_for(config.msg_per_sec),
            ),
            byte_bucket: TokenBucket::new(
                config.bytes_per_sec,
                LinkConfig::burst_for(config.bytes_per_sec),
            ),
            transcript: Pipe::new(),
            capturing: Cell::new(false),
            resync: Cell::new(false),
            inbound: InboundQueue::new(),
            outbound: OutboundQueue::new(),
            stats: Cell::new(LinkStats::default()),
            watchdog_enabled: Cell::new(config.watchdog_enabled),
            config,
        }
    }

    // ── UART transmit ──────────────────────────────────────────

    /// Write bytes to the modem and stamp `last_tx`.
    ///
    /// Does not take the command lock; callers decide what may interleave.
    pub fn write_raw(&self, data: &[u8]) -> Result<(), LinkError> {
        let mut tx = self.tx.borrow_mut();
        match write_all(&mut *tx, data) {
            Ok(()) => {
                self.last_tx.set(Instant::now());
                Ok(())
            }
            Err(e) => {
                warn!("TX: UART write of {} bytes failed: {:?}", data.len(), e);
                Err(LinkError::UartWrite)
            }
        }
    }

    // ── Activity timestamps ────────────────────────────────────

    pub fn mark_rx(&self) {
        self.last_rx.set(Instant::now());
    }

    pub fn tx_age(&self) -> Duration {
        self.last_tx.get().elapsed()
    }

    pub fn rx_age(&self) -> Duration {
        self.last_rx.get().elapsed()
    }

    /// Forget past activity, e.g. after a modem power cycle.
    pub fn reset_activity(&self) {
        let now = Instant::now();
        self.last_tx.set(now);
        self.last_rx.set(now);
    }

    // ── Mode ───────────────────────────────────────────────────

    pub fn state(&self) -> LinkState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, next: LinkState) {
        let prev = self.state.replace(next);
        if prev != next {
            info!("MODE: {} -> {}", prev, next);
        }
    }

    pub fn is_transparent(&self) -> bool {
        self.state() == LinkState::TransparentReady
    }

    /// Whether transparent streaming is still worth attempting.
    pub fn transparent_wanted(&self) -> bool {
        self.transparent_wanted.get()
    }

    pub(crate) fn set_transparent_wanted(&self, wanted: bool) {
        self.transparent_wanted.set(wanted);
    }

    // ── Reply transcript ───────────────────────────────────────

    pub(crate) fn set_capturing(&self, on: bool) {
        self.capturing.set(on);
    }

    /// Called by the reader for every complete line.
    pub(crate) fn capture_line(&self, line: &str) {
        if !self.capturing.get() {
            return;
        }
        let mut rec = Vec::with_capacity(line.len() + 2);
        rec.extend_from_slice(line.as_bytes());
        rec.extend_from_slice(b"\r\n");
        let written = self.transcript.try_write(&rec).unwrap_or(0);
        if written < rec.len() {
            debug!("RX: transcript full, {} bytes dropped", rec.len() - written);
        }
    }

    /// Ask the reader to discard its partial input before the next chunk.
    pub(crate) fn request_resync(&self) {
        self.resync.set(true);
    }

    pub(crate) fn take_resync(&self) -> bool {
        self.resync.replace(false)
    }

    // ── Statistics ─────────────────────────────────────────────

    pub fn stats(&self) -> LinkStats {
        self.stats.get()
    }

    pub(crate) fn bump(&self, f: impl FnOnce(&mut LinkStats)) {
        let mut s = self.stats.get();
        f(&mut s);
        self.stats.set(s);
    }

    // ── Watchdog switch ────────────────────────────────────────

    pub fn watchdog_enabled(&self) -> bool {
        self.watchdog_enabled.get()
    }

    pub fn set_watchdog_enabled(&self, on: bool) {
        self.watchdog_enabled.set(on);
    }
}

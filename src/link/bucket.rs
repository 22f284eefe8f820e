//! Async token-bucket rate limiter.
//!
//! Permits accrue at `rate` per second up to `capacity`.  Refill is driven
//! by the monotonic clock and only advances `last_refill` when at least one
//! whole token was added, so fractional time is never lost between calls.
//!
//! Two buckets throttle the modem link: one unit per AT command or
//! application send, and one unit per payload byte in transparent mode.

use std::time::Instant;

use core::time::Duration;
use embassy_sync::mutex::Mutex;

use super::channels::LinkMutex;

/// Refill state guarded by the bucket mutex.
#[derive(Debug, Clone, Copy)]
pub struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: u32, capacity: u32) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis() as u64;
        if elapsed_ms == 0 {
            return;
        }
        let add = (rate as u64 * elapsed_ms) / 1000;
        if add > 0 {
            self.tokens = (self.tokens as u64 + add).min(capacity as u64) as u32;
            self.last_refill = now;
        }
    }

    /// Refill, then take `amount` or report how long until it is available.
    fn take(&mut self, amount: u32, now: Instant, rate: u32, capacity: u32) -> Result<(), Duration> {
        self.refill(now, rate, capacity);
        if self.tokens >= amount {
            self.tokens -= amount;
            return Ok(());
        }
        let need = (amount - self.tokens) as u64;
        let rate = rate.max(1) as u64;
        let wait_ms = (need * 1000).div_ceil(rate).max(1);
        Err(Duration::from_millis(wait_ms))
    }
}

pub struct TokenBucket {
    rate: u32,
    capacity: u32,
    state: Mutex<LinkMutex, BucketState>,
}

impl TokenBucket {
    /// A bucket that starts full.  `rate == 0` means unlimited.
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        let capacity = if rate_per_sec > 0 {
            burst.max(rate_per_sec)
        } else {
            0
        };
        Self {
            rate: rate_per_sec,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current token count, or `None` while a consumer holds the bucket.
    pub fn tokens(&self) -> Option<u32> {
        self.state.try_lock().ok().map(|s| s.tokens)
    }

    /// Non-blocking consume against an explicit clock reading.
    ///
    /// Returns the minimal wait on shortfall.  Amounts above capacity can
    /// never succeed here; use [`consume`](Self::consume) for those.
    pub fn try_consume_at(&self, amount: u32, now: Instant) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        match self.state.try_lock() {
            Ok(mut st) => st.take(amount, now, self.rate, self.capacity),
            Err(_) => Err(Duration::from_millis(1)),
        }
    }

    /// Wait until `amount` tokens are available and take them.
    ///
    /// Amounts larger than the capacity are taken in capacity-sized
    /// installments so a large payload is paced rather than refused.
    pub async fn consume(&self, amount: u32) {
        if self.is_unlimited() {
            return;
        }
        let mut remaining = amount;
        while remaining > 0 {
            let step = remaining.min(self.capacity);
            self.consume_step(step).await;
            remaining -= step;
        }
    }

    async fn consume_step(&self, amount: u32) {
        let mut st = self.state.lock().await;
        loop {
            match st.take(amount, Instant::now(), self.rate, self.capacity) {
                Ok(()) => return,
                Err(wait) => {
                    async_io_mini::Timer::after(wait).await;
                }
            }
        }
    }
}

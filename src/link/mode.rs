//! Command ↔ transparent-streaming mode state machine.
//!
//! ```text
//!            enter_transparent()          '>' matched
//!  Command ──────────────────────▶ Negotiating ──────────▶ TransparentReady
//!     ▲  ◀──────────────────────────────┘ step failed            │
//!     │                                                   escape()
//!     └──────────────────── Escaping ◀───────────────────────────┘
//!             guard + drain
//! ```
//!
//! Every transition first takes all send permits, so no application send
//! is in flight while the mode changes and a send observes one mode from
//! start to finish.  Permits are always taken before the command lock.

use core::fmt;
use core::time::Duration;
use embassy_sync::semaphore::{GreedySemaphore, Semaphore, SemaphoreReleaser};
use log::{info, warn};

use super::bringup::cipstart_command;
use super::channels::LinkMutex;
use super::context::LinkContext;
use super::transport::SerialTx;

/// Attempts at opening the transparent stream before giving up for good.
pub const TRANSPARENT_ATTEMPTS: u8 = 3;

const TRANSPARENT_BACKOFF: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Command,
    NegotiatingTransparent,
    TransparentReady,
    Escaping,
}

impl LinkState {
    /// Legal edges.  Falling back to `Command` is always allowed (modem reset).
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Command)
                | (Self::Command, Self::NegotiatingTransparent)
                | (Self::NegotiatingTransparent, Self::TransparentReady)
                | (Self::Command | Self::TransparentReady, Self::Escaping)
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Command => "command",
            Self::NegotiatingTransparent => "negotiating",
            Self::TransparentReady => "transparent",
            Self::Escaping => "escaping",
        };
        f.write_str(s)
    }
}

type Quiesced<'a> = SemaphoreReleaser<'a, GreedySemaphore<LinkMutex>>;

impl<T: SerialTx> LinkContext<T> {
    /// Wait for every in-flight send to finish and block new ones.
    async fn quiesce(&self) -> Quiesced<'_> {
        match self
            .send_permits
            .acquire(self.config.max_inflight_sends)
            .await
        {
            Ok(permits) => permits,
            Err(never) => match never {},
        }
    }

    fn transition(&self, next: LinkState) {
        let prev = self.state();
        if !prev.can_transition_to(next) {
            warn!("MODE: unexpected transition {} -> {}", prev, next);
        }
        self.set_state(next);
    }

    /// One `CIPMODE=1` / `CIPSTART` / `CIPSEND` handshake.
    pub async fn open_transparent_once(&self) -> bool {
        let Some(cipstart) = cipstart_command(&self.config) else {
            return false;
        };
        let _quiet = self.quiesce().await;
        let mut session = self.session().await;
        self.transition(LinkState::NegotiatingTransparent);

        let cmd_timeout = self.config.command_timeout();
        let prompt_timeout = Duration::from_millis(self.config.prompt_timeout_ms as u64);
        let steps: [(&str, &[&str], Duration); 3] = [
            ("AT+CIPMODE=1", &["OK"], cmd_timeout),
            (cipstart.as_str(), &["OK", "ALREADY CONNECTED"], cmd_timeout),
            ("AT+CIPSEND", &[">"], prompt_timeout),
        ];
        for (text, expect, timeout) in steps {
            let reply = session.command(text, expect, timeout).await;
            if !reply.matched() {
                warn!("MODE: '{}' failed ({:?}): {}", text, reply.outcome, reply.last_line);
                self.transition(LinkState::Command);
                return false;
            }
        }
        self.transition(LinkState::TransparentReady);
        true
    }

    /// Enter transparent streaming, retrying a few times before falling
    /// back to per-message framing for the rest of the session.
    pub async fn enter_transparent(&self) -> bool {
        if self.is_transparent() {
            return true;
        }
        if !self.transparent_wanted() {
            return false;
        }

        for attempt in 1..=TRANSPARENT_ATTEMPTS {
            if attempt > 1 {
                async_io_mini::Timer::after(TRANSPARENT_BACKOFF).await;
                // A lost prompt may have left the modem in data mode.
                self.escape().await;
            }
            if self.open_transparent_once().await {
                info!("MODE: transparent stream open (attempt {})", attempt);
                return true;
            }
        }

        warn!(
            "MODE: transparent mode failed {} times, using per-message framing",
            TRANSPARENT_ATTEMPTS
        );
        self.set_transparent_wanted(false);
        let reply = self
            .send_command("AT+CIPMODE=0", &["OK"], self.config.command_timeout())
            .await;
        if !reply.matched() {
            warn!("MODE: could not restore CIPMODE=0: {}", reply.last_line);
        }
        false
    }

    /// Leave data mode with the `+++` escape and return to `Command`.
    ///
    /// Silence is kept for the guard interval on both sides of the escape,
    /// then any residual bytes are discarded and the reader resynchronises.
    pub async fn escape(&self) {
        let _quiet = self.quiesce().await;
        let _session = self.session().await;
        self.transition(LinkState::Escaping);

        let guard = self.config.escape_guard();
        let quiet_for = self.tx_age();
        if quiet_for < guard {
            async_io_mini::Timer::after(guard - quiet_for).await;
        }
        if self.write_raw(b"+++").is_err() {
            warn!("MODE: escape write failed");
        }
        async_io_mini::Timer::after(guard).await;

        // Drain
        self.request_resync();
        self.transcript.clear();
        async_io_mini::Timer::after(self.config.poll_interval() * 2).await;
        self.transcript.clear();

        self.transition(LinkState::Command);
    }
}

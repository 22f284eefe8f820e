//! Unified error types for the bridge firmware.
//!
//! A single `Error` enum that every subsystem can convert into, with the
//! UART protocol engine's own taxonomy in [`LinkError`].  All variants are
//! `Copy` so they can be handed between tasks and logged without allocation.
//!
//! Most link faults never travel as `Err`: command-level failures come back
//! to the immediate caller as a [`CommandOutcome`](crate::link::correlator::CommandOutcome),
//! and transport-local faults are recovered where they occur.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The UART protocol engine failed.
    Link(LinkError),
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(e) => write!(f, "link: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Link errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Expected reply token not seen before the deadline.
    CommandTimeout,
    /// More reply bytes consumed than the command's budget allowed.
    ByteBudgetExceeded,
    /// `+IPD` header fields were missing or non-numeric.
    FrameHeaderMalformed,
    /// Frame payload held no decodable `{...}` record.
    FramePayloadDecode,
    /// Watchdog saw transmit activity with no reply traffic.
    LinkStalled,
    /// The UART driver rejected a write.
    UartWrite,
    /// Reply token does not fit a registry key.
    TokenTooLong,
    /// Every waiter slot is taken.
    RegistryFull,
    /// A bring-up step failed; carries the step index.
    StepFailed(u8),
    /// The modem enable/reset line could not be driven.
    ModemResetFailed,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandTimeout => write!(f, "command timed out"),
            Self::ByteBudgetExceeded => write!(f, "reply byte budget exceeded"),
            Self::FrameHeaderMalformed => write!(f, "malformed +IPD header"),
            Self::FramePayloadDecode => write!(f, "frame payload not decodable"),
            Self::LinkStalled => write!(f, "link stalled"),
            Self::UartWrite => write!(f, "UART write failed"),
            Self::TokenTooLong => write!(f, "reply token too long"),
            Self::RegistryFull => write!(f, "waiter registry full"),
            Self::StepFailed(i) => write!(f, "bring-up step {i} failed"),
            Self::ModemResetFailed => write!(f, "modem reset line failed"),
        }
    }
}

impl From<LinkError> for Error {
    fn from(e: LinkError) -> Self {
        Self::Link(e)
    }
}

impl std::error::Error for LinkError {}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

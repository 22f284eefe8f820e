//! Application-facing link queues.
//!
//! Uses `embassy-sync` bounded channels between the link tasks and the
//! application.  All tasks run on one cooperative executor, so the
//! channels use the no-op raw mutex.
//!
//! ```text
//! ┌──────────────┐  InboundRecord   ┌──────────────┐
//! │ Reader task  │────────────────▶│ Application  │
//! │ Sender tasks │◀────────────────│              │
//! └──────────────┘ OutboundMessage  └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;

/// Raw mutex for every link primitive (single-threaded executor).
pub type LinkMutex = NoopRawMutex;

/// Modem-assigned TCP connection identifier.
pub type LinkId = u8;

/// Decoded inbound record, tagged with the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRecord {
    pub link_id: LinkId,
    pub record: serde_json::Value,
}

/// Outbound application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target connection; `None` on a single-connection client.
    pub link_id: Option<LinkId>,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(link_id: Option<LinkId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            link_id,
            payload: payload.into(),
        }
    }
}

/// Channel depth for inbound (reader → application) records.
pub const INBOUND_DEPTH: usize = 16;

/// Channel depth for outbound (application → sender) messages.
pub const OUTBOUND_DEPTH: usize = 16;

pub type InboundQueue = Channel<LinkMutex, InboundRecord, INBOUND_DEPTH>;
pub type OutboundQueue = Channel<LinkMutex, OutboundMessage, OUTBOUND_DEPTH>;

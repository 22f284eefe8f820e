//! Outbound application path with bounded concurrency.
//!
//! Each send holds one permit of the send semaphore for its whole life, so
//! at most `max_inflight_sends` are in flight and the mode cannot change
//! under a send.  Failed items are reported, never retried or re-queued.

use core::time::Duration;
use embassy_sync::semaphore::Semaphore;
use log::{debug, info, warn};

use super::channels::OutboundMessage;
use super::context::LinkContext;
use super::correlator::{CommandOutcome, CommandRequest};
use super::mode::LinkState;
use super::transport::SerialTx;
use crate::error::LinkError;

/// Why a delivered payload was not acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unconfirmed {
    /// The modem answered `SEND FAIL`.
    SendFail,
    /// Neither `SEND OK` nor `SEND FAIL` arrived in time.
    NoAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Raw write on the transparent stream (no per-message ack exists).
    Streamed,
    /// `SEND OK` received.
    Confirmed,
    /// Payload written after the prompt but not acknowledged.
    Unconfirmed(Unconfirmed),
    /// Payload never reached the modem.
    NotSent(LinkError),
    /// Empty payload, nothing to do.
    Skipped,
}

impl SendOutcome {
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Streamed | Self::Confirmed)
    }
}

/// `AT+CIPSEND` for a per-message send; multi-connection links name the id.
pub fn cipsend_command(link_id: Option<u8>, len: usize) -> String {
    match link_id {
        Some(id) => format!("AT+CIPSEND={id},{len}"),
        None => format!("AT+CIPSEND={len}"),
    }
}

impl<T: SerialTx> LinkContext<T> {
    /// Send one application payload, framed according to the current mode.
    pub async fn send_one(&self, msg: &OutboundMessage) -> SendOutcome {
        if msg.payload.is_empty() {
            debug!("TX: empty payload skipped");
            return SendOutcome::Skipped;
        }
        let _permit = match self.send_permits.acquire(1).await {
            Ok(p) => p,
            Err(never) => match never {},
        };
        self.msg_bucket.consume(1).await;

        // Sampled once; transitions wait for our permit.
        let state = self.state();
        let outcome = if state == LinkState::TransparentReady {
            self.stream(&msg.payload).await
        } else {
            self.send_framed(msg).await
        };

        self.bump(|s| match outcome {
            SendOutcome::Streamed => s.sends_streamed += 1,
            SendOutcome::Confirmed => s.sends_confirmed += 1,
            SendOutcome::Unconfirmed(_) => s.sends_unconfirmed += 1,
            SendOutcome::NotSent(_) => s.sends_failed += 1,
            SendOutcome::Skipped => {}
        });
        outcome
    }

    async fn stream(&self, payload: &[u8]) -> SendOutcome {
        self.byte_bucket.consume(payload.len() as u32).await;
        match self.write_raw(payload) {
            Ok(()) => SendOutcome::Streamed,
            Err(e) => SendOutcome::NotSent(e),
        }
    }

    async fn send_framed(&self, msg: &OutboundMessage) -> SendOutcome {
        let len = msg.payload.len();
        let cmd = cipsend_command(msg.link_id, len);
        let mut session = self.session().await;

        let prompt = session
            .exchange(&CommandRequest {
                text: &cmd,
                expect: &[">"],
                timeout: Duration::from_millis(self.config.prompt_timeout_ms as u64),
                budget: self.config.line_reader,
            })
            .await;
        if !prompt.matched() {
            warn!("TX: no prompt for {} ({})", cmd, prompt.last_line);
            return SendOutcome::NotSent(prompt.outcome.error().unwrap_or(LinkError::CommandTimeout));
        }

        if let Err(e) = session.write_payload(&msg.payload) {
            return SendOutcome::NotSent(e);
        }

        let ack = session
            .await_tokens(
                &["SEND OK", "SEND FAIL"],
                Duration::from_millis(self.config.send_ack_timeout_ms as u64),
            )
            .await;
        match (ack.outcome, ack.matched_index) {
            (CommandOutcome::Matched, Some(0)) => SendOutcome::Confirmed,
            (CommandOutcome::Matched, _) => {
                warn!("TX: SEND FAIL for {} bytes", len);
                SendOutcome::Unconfirmed(Unconfirmed::SendFail)
            }
            _ => {
                warn!("TX: no ack for {} bytes ({:?})", len, ack.outcome);
                SendOutcome::Unconfirmed(Unconfirmed::NoAck)
            }
        }
    }
}

/// Sender worker: drains the outbound queue forever.
pub async fn sender_loop<T: SerialTx>(ctx: &LinkContext<T>, worker: usize) {
    info!("TX: sender {} started", worker);
    loop {
        let msg = ctx.outbound.receive().await;
        let outcome = ctx.send_one(&msg).await;
        if outcome.is_delivered() {
            debug!("TX[{}]: {} bytes -> {:?}", worker, msg.payload.len(), outcome);
        } else {
            warn!("TX[{}]: {} bytes -> {:?}", worker, msg.payload.len(), outcome);
        }
    }
}

//! Link task wiring: the UART reader plus sender and watchdog tasks on
//! one `edge-executor` event loop.
//!
//! ```text
//!  ┌───────────────────────────────────────────────────────────────┐
//!  │  edge_executor::LocalExecutor                                 │
//!  │  ┌─────────────┐  ┌──────────────────┐  ┌──────────────────┐  │
//!  │  │ Reader      │  │ Sender × N       │  │ Watchdog         │  │
//!  │  │ poll ⏱      │  │ wake-on-send     │  │ check ⏱          │  │
//!  │  └──────┬──────┘  └────────┬─────────┘  └────────┬─────────┘  │
//!  │         ▼                  ▼                     ▼            │
//!  │   waiters / inbound   LinkContext (tx half, lock, buckets)    │
//!  └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The reader is the only code that ever reads the UART; it owns the
//! receive half outright.

use edge_executor::LocalExecutor;
use log::{debug, info, warn};

use super::channels::{InboundRecord, LinkId};
use super::context::LinkContext;
use super::demux::{DemuxEvent, FrameDemultiplexer, decode_record, json_span};
use super::sender::sender_loop;
use super::transport::{SerialRx, SerialTx};
use super::watchdog::{RecoveryPort, run_watchdog};

/// Control tokens resolved in the waiter registry when seen in a line.
pub const CONTROL_TOKENS: &[&str] = &[
    "OK",
    "ERROR",
    "FAIL",
    "SEND OK",
    "SEND FAIL",
    ">",
    "ALREADY CONNECTED",
];

fn deliver<T: SerialTx>(ctx: &LinkContext<T>, link_id: LinkId, record: serde_json::Value) {
    if ctx.inbound.try_send(InboundRecord { link_id, record }).is_err() {
        warn!("RX[{}]: inbound queue full, record dropped", link_id);
        ctx.bump(|s| s.frames_dropped += 1);
    } else {
        ctx.bump(|s| s.frames_delivered += 1);
    }
}

fn handle_line<T: SerialTx>(ctx: &LinkContext<T>, line: &str) {
    debug!("RX: {}", line);
    for token in CONTROL_TOKENS {
        if line.contains(token) {
            ctx.waiters.resolve(token);
        }
    }
    ctx.capture_line(line);

    // Transparent payloads arrive without +IPD framing.
    if ctx.is_transparent() && json_span(line.as_bytes()).is_some() {
        if let Ok(record) = decode_record(line.as_bytes()) {
            deliver(ctx, 0, record);
        }
    }
}

fn dispatch<T: SerialTx>(ctx: &LinkContext<T>, event: DemuxEvent) {
    match event {
        DemuxEvent::Line(line) => handle_line(ctx, &line),
        DemuxEvent::Frame(frame) => match decode_record(&frame.payload) {
            Ok(record) => deliver(ctx, frame.link_id, record),
            Err(e) => {
                warn!(
                    "RX[{}]: {} ({} bytes): {:?}",
                    frame.link_id,
                    e,
                    frame.payload.len(),
                    String::from_utf8_lossy(&frame.payload[..frame.payload.len().min(48)])
                );
                ctx.bump(|s| s.frames_dropped += 1);
            }
        },
        DemuxEvent::Malformed => ctx.bump(|s| s.malformed_headers += 1),
    }
}

/// Reader task.  Never returns.
pub async fn reader_loop<T: SerialTx, R: SerialRx>(ctx: &LinkContext<T>, mut rx: R) {
    let cfg = &ctx.config;
    let mut demux = FrameDemultiplexer::new(cfg.line_reader.max_line_bytes, cfg.max_frame_bytes);
    let mut buf = vec![0u8; cfg.line_reader.chunk_size.max(1)];
    let poll = cfg.poll_interval();
    info!("RX: reader started (poll {} ms)", poll.as_millis());

    loop {
        if ctx.take_resync() {
            if demux.buffered() > 0 {
                debug!("RX: resync, {} buffered bytes dropped", demux.buffered());
            }
            demux.reset();
        }
        match rx.read(&mut buf) {
            Ok(0) => {
                async_io_mini::Timer::after(poll).await;
            }
            Ok(n) => {
                ctx.mark_rx();
                for event in demux.feed(&buf[..n]) {
                    dispatch(ctx, event);
                }
                futures_lite::future::yield_now().await;
            }
            Err(e) => {
                warn!("RX: UART read error: {:?}", e);
                async_io_mini::Timer::after(poll).await;
            }
        }
    }
}

/// Spawn the reader, `max_inflight_sends` senders and (if enabled) the
/// watchdog on `executor`.
pub fn spawn_link<'a, const C: usize, T, R, P>(
    executor: &LocalExecutor<'a, C>,
    ctx: &'a LinkContext<T>,
    rx: R,
    recovery: P,
) where
    T: SerialTx + 'a,
    R: SerialRx + 'a,
    P: RecoveryPort + 'a,
{
    executor.spawn(reader_loop(ctx, rx)).detach();
    for worker in 0..ctx.config.max_inflight_sends {
        executor.spawn(sender_loop(ctx, worker)).detach();
    }
    if ctx.watchdog_enabled() {
        executor.spawn(run_watchdog(ctx, recovery)).detach();
    }
    info!(
        "link tasks started ({} sender(s), watchdog {})",
        ctx.config.max_inflight_sends,
        if ctx.watchdog_enabled() { "on" } else { "off" }
    );
}

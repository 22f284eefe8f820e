//! ESP-AT UART protocol engine.
//!
//! ```text
//!   UART rx ──▶ reader (demux) ──▶ waiters ──▶ correlator ◀── mode / watchdog
//!                    │
//!                    └──▶ inbound queue ──▶ application ──▶ outbound queue ──▶ senders ──▶ UART tx
//! ```
//!
//! Everything shares one [`context::LinkContext`]; only the reader task
//! ever reads the UART.

pub mod autodetect;
pub mod bringup;
pub mod bucket;
pub mod channels;
pub mod context;
pub mod correlator;
pub mod demux;
pub mod io_task;
pub mod mode;
pub mod sender;
pub mod transport;
pub mod waiters;
pub mod watchdog;

pub use channels::{InboundRecord, LinkId, OutboundMessage};
pub use context::{LinkContext, LinkStats};
pub use correlator::{CommandOutcome, CommandReply};
pub use mode::LinkState;
pub use sender::SendOutcome;

use core::future::Future;
use core::time::Duration;

/// Run `fut` with a deadline; `None` if the timer fired first.
pub async fn with_timeout<F: Future>(timeout: Duration, fut: F) -> Option<F::Output> {
    futures_lite::future::or(async { Some(fut.await) }, async {
        async_io_mini::Timer::after(timeout).await;
        None
    })
    .await
}

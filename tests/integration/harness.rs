//! Shared fixtures: a fast link configuration and a runner that drives a
//! test future alongside the reader task on a `LocalExecutor`.

use core::future::Future;
use core::time::Duration;
use std::time::Instant;

use atbridge::adapters::sim_modem::{SimModem, SimRx, SimTx};
use atbridge::config::{LinkConfig, LinkRole};
use atbridge::link::LinkContext;
use atbridge::link::io_task::reader_loop;
use edge_executor::LocalExecutor;
use futures_lite::future::block_on;

pub type SimLink = LinkContext<SimTx>;

pub const SHORT: Duration = Duration::from_millis(300);

/// Millisecond-scale timings so tests finish quickly.
pub fn test_config() -> LinkConfig {
    let mut c = LinkConfig::default();
    c.msg_per_sec = 0;
    c.bytes_per_sec = 0;
    c.inter_cmd_gap_ms = 0;
    c.watchdog_enabled = false;
    c.poll_interval_ms = 1;
    c.escape_guard_ms = 20;
    c.command_timeout_ms = 300;
    c.join_timeout_ms = 300;
    c.prompt_timeout_ms = 300;
    c.send_ack_timeout_ms = 300;
    c
}

pub fn server_config() -> LinkConfig {
    let mut c = test_config();
    c.role = LinkRole::Server {
        port: 8080,
        static_ip: None,
    };
    c
}

/// A link context over a fresh simulated modem.
pub fn link(config: LinkConfig) -> (SimModem, SimLink, SimRx) {
    let sim = SimModem::new();
    let (tx, rx) = sim.split();
    (sim, LinkContext::new(config, tx), rx)
}

/// Run `fut` to completion with the reader task serving `ctx`.
pub fn run<T>(ctx: &SimLink, rx: SimRx, fut: impl Future<Output = T>) -> T {
    let ex: LocalExecutor<'_, 8> = LocalExecutor::new();
    ex.spawn(reader_loop(ctx, rx)).detach();
    block_on(ex.run(fut))
}

/// Poll `cond` every few milliseconds until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        async_io_mini::Timer::after(Duration::from_millis(5)).await;
    }
    cond()
}

pub fn count(commands: &[String], cmd: &str) -> usize {
    commands.iter().filter(|c| *c == cmd).count()
}

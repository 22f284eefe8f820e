//! Command / reply correlation against the simulated modem.

use core::cell::Cell;
use core::time::Duration;
use std::time::Instant;

use atbridge::config::LineReaderBudget;
use atbridge::link::CommandOutcome;
use atbridge::link::correlator::CommandRequest;
use futures_lite::future::zip;

use super::harness::{SHORT, link, run, test_config};

#[test]
fn echoed_ok_matches_and_leaves_nothing_behind() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+GMR", "");

    let (first, second) = run(&ctx, rx, async {
        let first = ctx.send_command("AT", &["OK"], SHORT).await;
        // Silent command: a stale OK from the first reply must not match.
        let second = ctx.send_command("AT+GMR", &["OK"], SHORT).await;
        (first, second)
    });

    assert!(first.matched());
    assert_eq!(first.last_line, "OK");
    assert_eq!(second.outcome, CommandOutcome::Timeout);
    assert_eq!(sim.wire(), b"AT\r\nAT+GMR\r\n");
}

#[test]
fn echo_containing_token_is_not_a_reply() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+CWJAP=*", "");

    let reply = run(&ctx, rx, ctx.send_command("AT+CWJAP=\"OK\",\"pw\"", &["OK"], SHORT));
    assert_eq!(reply.outcome, CommandOutcome::Timeout);
}

#[test]
fn default_terminal_set_reports_error() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+BOGUS", "\r\nERROR\r\n");

    let reply = run(&ctx, rx, ctx.send_command("AT+BOGUS", &[], SHORT));
    assert_eq!(reply.outcome, CommandOutcome::Terminal);
    assert!(!reply.matched());
    assert_eq!(reply.last_line, "ERROR");
}

#[test]
fn pattern_token_matches_query_reply() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+CIPMODE?", "\r\n+CIPMODE:1\r\n\r\nOK\r\n");

    let reply = run(&ctx, rx, ctx.send_command("AT+CIPMODE?", &[r"\+CIPMODE:\d"], SHORT));
    assert!(reply.matched());
    assert_eq!(reply.matched_index, Some(0));
    assert_eq!(reply.last_line, "+CIPMODE:1");
}

#[test]
fn byte_budget_stops_a_chatty_reply() {
    let (sim, ctx, rx) = link(test_config());
    let noise = format!("{}\r\n", "x".repeat(100)).repeat(6);
    sim.on("AT+FLOOD", &noise);

    let reply = run(
        &ctx,
        rx,
        ctx.send_request(&CommandRequest {
            text: "AT+FLOOD",
            expect: &["OK"],
            timeout: Duration::from_secs(2),
            budget: LineReaderBudget {
                max_bytes: 256,
                chunk_size: 32,
                max_line_bytes: 128,
            },
        }),
    );
    assert_eq!(reply.outcome, CommandOutcome::ByteBudgetExceeded);
    assert_eq!(
        reply.outcome.error(),
        Some(atbridge::error::LinkError::ByteBudgetExceeded)
    );
}

#[test]
fn concurrent_commands_never_interleave() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+SLOW", "");
    let first_done = Cell::new(None::<Instant>);

    let start = Instant::now();
    let (slow, fast) = run(
        &ctx,
        rx,
        zip(
            async {
                let r = ctx
                    .send_command("AT+SLOW", &["OK"], Duration::from_millis(150))
                    .await;
                first_done.set(Some(Instant::now()));
                r
            },
            async {
                let r = ctx.send_command("AT", &["OK"], SHORT).await;
                (r, Instant::now())
            },
        ),
    );

    assert_eq!(slow.outcome, CommandOutcome::Timeout);
    assert!(fast.0.matched());
    let first_done = first_done.get().unwrap();
    assert!(fast.1 >= first_done);
    assert!(first_done - start >= Duration::from_millis(150));
    assert_eq!(sim.commands(), ["AT+SLOW", "AT"]);
    assert_eq!(sim.wire(), b"AT+SLOW\r\nAT\r\n");
}

#[test]
fn async_command_resolves_through_registry() {
    let (_sim, ctx, rx) = link(test_config());

    let reply = run(&ctx, rx, ctx.send_command_async("AT", &["OK"], SHORT));
    assert!(reply.matched());
    assert_eq!(reply.last_line, "OK");
    assert!(ctx.waiters.is_empty());
}

#[test]
fn concurrent_async_commands_each_get_their_own_reply() {
    let (sim, ctx, rx) = link(test_config());

    let (first, second) = run(
        &ctx,
        rx,
        zip(
            ctx.send_command_async("AT", &["OK"], SHORT),
            ctx.send_command_async("AT+GMR", &["OK"], SHORT),
        ),
    );

    assert_eq!(first.outcome, CommandOutcome::Matched);
    assert_eq!(second.outcome, CommandOutcome::Matched);
    // The second command is only written once the first has its reply.
    assert_eq!(sim.wire(), b"AT\r\nAT+GMR\r\n");
    assert!(ctx.waiters.is_empty());
}

#[test]
fn async_command_waits_behind_a_silent_one() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+SLOW", "");

    let (slow, fast) = run(
        &ctx,
        rx,
        zip(
            ctx.send_command_async("AT+SLOW", &["OK"], Duration::from_millis(100)),
            ctx.send_command_async("AT", &["OK"], SHORT),
        ),
    );

    assert_eq!(slow.outcome, CommandOutcome::Timeout);
    assert!(fast.matched());
    assert_eq!(sim.commands(), ["AT+SLOW", "AT"]);
}

#[test]
fn async_command_times_out_and_cleans_up() {
    let (sim, ctx, rx) = link(test_config());
    sim.set_stalled(true);

    let reply = run(&ctx, rx, ctx.send_command_async("AT", &["OK"], Duration::from_millis(50)));
    assert_eq!(reply.outcome, CommandOutcome::Timeout);
    assert!(ctx.waiters.is_empty());
}

#[test]
fn wait_token_sees_unsolicited_line() {
    let (sim, ctx, rx) = link(test_config());

    let (seen, ()) = run(
        &ctx,
        rx,
        zip(ctx.wait_token("SEND OK", SHORT), async {
            async_io_mini::Timer::after(Duration::from_millis(10)).await;
            sim.inject(b"\r\nSEND OK\r\n");
        }),
    );
    assert!(seen);
}

#[test]
fn wait_token_times_out() {
    let (_sim, ctx, rx) = link(test_config());
    assert!(!run(&ctx, rx, ctx.wait_token(">", Duration::from_millis(30))));
}

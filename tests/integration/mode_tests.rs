//! Command / transparent mode transitions.

use core::time::Duration;

use atbridge::link::mode::TRANSPARENT_ATTEMPTS;
use atbridge::link::{LinkState, OutboundMessage, SendOutcome};

use super::harness::{count, link, run, server_config, test_config};

#[test]
fn transparent_handshake_order() {
    let (sim, ctx, rx) = link(test_config());

    assert!(run(&ctx, rx, ctx.enter_transparent()));
    assert_eq!(ctx.state(), LinkState::TransparentReady);
    assert!(ctx.is_transparent());
    assert!(sim.in_transparent());
    assert_eq!(
        sim.commands(),
        [
            "AT+CIPMODE=1",
            "AT+CIPSTART=\"TCP\",\"192.168.1.100\",8080",
            "AT+CIPSEND",
        ]
    );
}

#[test]
fn transparent_send_streams_raw_bytes() {
    let (sim, ctx, rx) = link(test_config());

    let outcome = run(&ctx, rx, async {
        assert!(ctx.enter_transparent().await);
        ctx.send_one(&OutboundMessage::new(None, &b"{\"t\":1}\r\n"[..]))
            .await
    });
    assert_eq!(outcome, SendOutcome::Streamed);
    assert_eq!(sim.streamed(), b"{\"t\":1}\r\n");
    assert_eq!(count(&sim.commands(), "AT+CIPSEND"), 1);
    assert_eq!(ctx.stats().sends_streamed, 1);
}

#[test]
fn escape_returns_to_command_mode() {
    let (sim, ctx, rx) = link(test_config());

    let reply = run(&ctx, rx, async {
        assert!(ctx.enter_transparent().await);
        ctx.escape().await;
        ctx.send_command("AT", &["OK"], Duration::from_millis(300))
            .await
    });
    assert_eq!(ctx.state(), LinkState::Command);
    assert_eq!(sim.escapes(), 1);
    assert!(!sim.in_transparent());
    assert!(reply.matched());
    assert!(sim.wire().windows(3).any(|w| w == b"+++"));
}

#[test]
fn repeated_failure_falls_back_to_framed_sends() {
    let mut cfg = test_config();
    cfg.prompt_timeout_ms = 100;
    let (sim, ctx, rx) = link(cfg);
    sim.on("AT+CIPSEND", "\r\nERROR\r\n");

    let (entered, outcome) = run(&ctx, rx, async {
        let entered = ctx.enter_transparent().await;
        let outcome = ctx.send_one(&OutboundMessage::new(None, &b"hello"[..])).await;
        (entered, outcome)
    });

    assert!(!entered);
    assert!(!ctx.transparent_wanted());
    assert_eq!(ctx.state(), LinkState::Command);

    let cmds = sim.commands();
    assert_eq!(
        count(&cmds, "AT+CIPMODE=1"),
        usize::from(TRANSPARENT_ATTEMPTS)
    );
    // Escape before every retry, never before the first attempt.
    assert_eq!(sim.escapes(), u32::from(TRANSPARENT_ATTEMPTS) - 1);
    let fallback = cmds.iter().position(|c| c == "AT+CIPMODE=0").unwrap();
    assert_eq!(cmds[fallback + 1], "AT+CIPSEND=5");

    assert_eq!(outcome, SendOutcome::Confirmed);
    assert!(sim.wire().ends_with(b"AT+CIPSEND=5\r\nhello"));
    assert_eq!(sim.payloads(), [b"hello".to_vec()]);
}

#[test]
fn fallback_is_sticky() {
    let mut cfg = test_config();
    cfg.prompt_timeout_ms = 50;
    let (sim, ctx, rx) = link(cfg);
    sim.on("AT+CIPSEND", "\r\nERROR\r\n");

    let again = run(&ctx, rx, async {
        ctx.enter_transparent().await;
        ctx.enter_transparent().await
    });
    assert!(!again);
    assert_eq!(
        count(&sim.commands(), "AT+CIPMODE=1"),
        usize::from(TRANSPARENT_ATTEMPTS)
    );
}

#[test]
fn server_role_never_negotiates_transparent() {
    let (sim, ctx, rx) = link(server_config());

    assert!(!ctx.transparent_wanted());
    assert!(!run(&ctx, rx, ctx.enter_transparent()));
    assert!(sim.commands().is_empty());
    assert_eq!(sim.escapes(), 0);
    assert_eq!(ctx.state(), LinkState::Command);
}

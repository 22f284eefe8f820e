//! Bring-up plans and UART autodetect.

use core::time::Duration;

use atbridge::adapters::sim_modem::SimModem;
use atbridge::config::LinkRole;
use atbridge::error::LinkError;
use atbridge::link::autodetect::{autodetect, candidates, probe};
use atbridge::link::bringup::{self, plan_for};
use atbridge::link::LinkState;
use futures_lite::future::block_on;

use super::harness::{link, run, server_config, test_config};

const GUARD: Duration = Duration::from_millis(5);

#[test]
fn client_bring_up_ends_transparent() {
    let (sim, ctx, rx) = link(test_config());

    let result = run(&ctx, rx, bringup::bring_up(&ctx));
    assert_eq!(result, Ok(()));
    assert_eq!(ctx.state(), LinkState::TransparentReady);
    // Only the defensive escape at the start.
    assert_eq!(sim.escapes(), 1);

    let cmds = sim.commands();
    let plan: Vec<_> = plan_for(&ctx.config).into_iter().map(|s| s.command).collect();
    assert_eq!(&cmds[..plan.len()], &plan[..]);
    assert_eq!(cmds.last().map(String::as_str), Some("AT+CIPSEND"));
}

#[test]
fn client_without_transparent_stays_in_command_mode() {
    let mut cfg = test_config();
    cfg.prefer_transparent = false;
    let (sim, ctx, rx) = link(cfg);

    assert_eq!(run(&ctx, rx, bringup::bring_up(&ctx)), Ok(()));
    assert_eq!(ctx.state(), LinkState::Command);
    assert!(!sim.commands().iter().any(|c| c == "AT+CIPMODE=1"));
}

#[test]
fn failed_join_reports_step_index() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+CWJAP=*", "\r\nFAIL\r\n");

    let result = run(&ctx, rx, bringup::bring_up(&ctx));
    assert_eq!(result, Err(LinkError::StepFailed(3)));
    assert!(!sim.commands().iter().any(|c| c.starts_with("AT+CIPSTART")));
}

#[test]
fn failed_bring_up_leaves_command_mode_without_retrying() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+CWJAP=*", "\r\nFAIL\r\n");

    let result = run(&ctx, rx, async {
        let result = bringup::bring_up(&ctx).await;
        // Nothing re-runs the plan on its own.
        async_io_mini::Timer::after(Duration::from_millis(100)).await;
        result
    });
    assert!(result.is_err());
    assert_eq!(ctx.state(), LinkState::Command);
    let joins = sim.commands().iter().filter(|c| c.starts_with("AT+CWJAP=")).count();
    assert_eq!(joins, 1);
}

#[test]
fn already_connected_counts_as_joined() {
    let (sim, ctx, rx) = link(test_config());
    sim.on("AT+CWJAP=*", "\r\nALREADY CONNECTED\r\n");

    assert_eq!(run(&ctx, rx, bringup::bring_up(&ctx)), Ok(()));
}

#[test]
fn server_bring_up_listens() {
    let (sim, ctx, rx) = link(server_config());

    assert_eq!(run(&ctx, rx, bringup::bring_up(&ctx)), Ok(()));
    assert_eq!(sim.escapes(), 0);
    assert_eq!(ctx.state(), LinkState::Command);
    let cmds = sim.commands();
    assert_eq!(cmds[2], "AT+CWMODE=1");
    assert!(cmds.iter().any(|c| c == "AT+CIPMUX=1"));
    assert_eq!(cmds.last().map(String::as_str), Some("AT+CIPSERVER=1,8080"));
    assert!(matches!(ctx.config.role, LinkRole::Server { port: 8080, .. }));
}

#[test]
fn probe_accepts_error_reply() {
    let mut sim = SimModem::new();
    sim.on("AT", "\r\nERROR\r\n");
    assert!(block_on(probe(&mut sim, GUARD)));
    assert_eq!(sim.escapes(), 1);
}

#[test]
fn autodetect_finds_answering_candidate() {
    let found = block_on(autodetect(&[0, 1], &[9_600, 115_200], GUARD, |port, baud| {
        match (port, baud) {
            (0, _) => None,
            (1, 9_600) => {
                let sim = SimModem::new();
                sim.set_stalled(true);
                Some(sim)
            }
            _ => Some(SimModem::new()),
        }
    }));
    assert_eq!(found, Some((1, 115_200)));
}

#[test]
fn autodetect_gives_up_when_nothing_answers() {
    let found = block_on(autodetect(&[2], &[115_200], GUARD, |_, _| {
        let sim = SimModem::new();
        sim.set_stalled(true);
        Some(sim)
    }));
    assert_eq!(found, None);
}

#[test]
fn autodetect_tries_configured_port_first() {
    let ports = candidates(2, &[0, 1, 2]);
    let bauds = candidates(115_200, &[9_600, 115_200]);
    let mut tried = Vec::new();
    let found = block_on(autodetect(&ports, &bauds, GUARD, |port, baud| {
        tried.push((port, baud));
        Some(SimModem::new())
    }));
    assert_eq!(found, Some((2, 115_200)));
    assert_eq!(tried, [(2, 115_200)]);
}

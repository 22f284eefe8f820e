//! Modem bring-up: join the network and open the TCP side.
//!
//! A plan is an ordered list of AT steps run through the correlator; the
//! first failing step aborts the plan with its index.

use core::fmt::Write as _;
use core::time::Duration;
use log::{info, warn};

use super::context::LinkContext;
use super::transport::SerialTx;
use crate::config::{LinkConfig, LinkRole};
use crate::error::LinkError;

/// Pause between bring-up steps.
const STEP_PACING: Duration = Duration::from_millis(50);

/// One bring-up command and the tokens that count as success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtStep {
    pub command: String,
    pub expect: &'static [&'static str],
    pub timeout: Duration,
}

impl AtStep {
    fn new(command: impl Into<String>, expect: &'static [&'static str], timeout: Duration) -> Self {
        Self {
            command: command.into(),
            expect,
            timeout,
        }
    }
}

/// Quote a string argument, escaping the characters ESP-AT treats specially.
pub fn at_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '"' | ',' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// `AT+CIPSTART` for the client role; `None` for a server.
pub fn cipstart_command(cfg: &LinkConfig) -> Option<String> {
    match &cfg.role {
        LinkRole::Client { host, port } => {
            Some(format!("AT+CIPSTART=\"TCP\",{},{}", at_quote(host), port))
        }
        LinkRole::Server { .. } => None,
    }
}

fn join_step(cfg: &LinkConfig) -> AtStep {
    let mut cmd = String::from("AT+CWJAP=");
    let _ = write!(cmd, "{},{}", at_quote(&cfg.ssid), at_quote(&cfg.password));
    AtStep::new(
        cmd,
        &["OK", "ALREADY CONNECTED"],
        Duration::from_millis(cfg.join_timeout_ms as u64),
    )
}

/// Steps for the configured role.
pub fn plan_for(cfg: &LinkConfig) -> Vec<AtStep> {
    let t = cfg.command_timeout();
    let mut steps = vec![
        AtStep::new("AT", &["OK"], t),
        AtStep::new("ATE0", &["OK"], t),
    ];
    match &cfg.role {
        LinkRole::Client { .. } => {
            steps.push(AtStep::new("AT+CWMODE=3", &["OK"], t));
            steps.push(join_step(cfg));
            steps.push(AtStep::new("AT+CIFSR", &["OK"], t));
            steps.push(AtStep::new("AT+CIPMUX=0", &["OK"], t));
            if let Some(cipstart) = cipstart_command(cfg) {
                steps.push(AtStep::new(cipstart, &["OK", "ALREADY CONNECTED"], t));
            }
        }
        LinkRole::Server { port, static_ip } => {
            steps.push(AtStep::new("AT+CWMODE=1", &["OK"], t));
            steps.push(join_step(cfg));
            if let Some(ip) = static_ip {
                steps.push(AtStep::new(
                    format!(
                        "AT+CIPSTA={},{},{}",
                        at_quote(&ip.ip),
                        at_quote(&ip.gateway),
                        at_quote(&ip.netmask)
                    ),
                    &["OK"],
                    t,
                ));
            }
            steps.push(AtStep::new("AT+CIFSR", &["OK"], t));
            steps.push(AtStep::new("AT+CIPMUX=1", &["OK"], t));
            steps.push(AtStep::new(format!("AT+CIPSERVER=1,{port}"), &["OK"], t));
        }
    }
    steps
}

/// Run `steps` in order, stopping at the first failure.
pub async fn run_plan<T: SerialTx>(ctx: &LinkContext<T>, steps: &[AtStep]) -> Result<(), LinkError> {
    for (i, step) in steps.iter().enumerate() {
        if i > 0 {
            async_io_mini::Timer::after(STEP_PACING).await;
        }
        let reply = ctx.send_command(&step.command, step.expect, step.timeout).await;
        if !reply.matched() {
            warn!(
                "BRINGUP: step {} '{}' failed ({:?}): {}",
                i, step.command, reply.outcome, reply.last_line
            );
            return Err(LinkError::StepFailed(i as u8));
        }
    }
    Ok(())
}

/// Full bring-up for the configured role, ending in transparent mode when
/// that is possible and still wanted.
pub async fn bring_up<T: SerialTx>(ctx: &LinkContext<T>) -> Result<(), LinkError> {
    let client = matches!(ctx.config.role, LinkRole::Client { .. });
    if client {
        // The modem may still be streaming from a previous session.
        ctx.escape().await;
    }

    run_plan(ctx, &plan_for(&ctx.config)).await?;

    if ctx.config.transparent_capable() && ctx.transparent_wanted() {
        let streaming = ctx.enter_transparent().await;
        info!(
            "BRINGUP: link up ({})",
            if streaming { "transparent" } else { "per-message" }
        );
    } else {
        info!("BRINGUP: link up");
    }
    Ok(())
}

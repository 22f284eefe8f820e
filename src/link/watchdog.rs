//! Link liveness watchdog and recovery ladder.
//!
//! The link is stalled when something was written recently but nothing has
//! come back for longer than the idle timeout.  Recovery escalates:
//!
//! 1. soft recovery (escape, then reopen the stream or probe with `AT`)
//! 2. after `max_fails_before_hard` consecutive soft failures, a modem
//!    power cycle followed by a full bring-up
//!
//! The failure counter is cleared by any soft success and after every hard
//! reset attempt, whatever its result.  Nothing here ever aborts.

use core::time::Duration;
use log::{info, warn};

use super::bringup;
use super::context::LinkContext;
use super::mode::LinkState;
use super::transport::SerialTx;
use crate::adapters::modem_reset::ModemReset;
use crate::error::LinkError;

/// Recovery actions the watchdog can drive.
#[allow(async_fn_in_trait)]
pub trait RecoveryPort {
    /// Escape and re-establish the current mode.  `true` on success.
    async fn soft_recover(&mut self) -> bool;
    /// Power-cycle the modem.  `false` when no reset line is wired.
    async fn hard_reset(&mut self) -> bool;
    /// Full bring-up after a power cycle.
    async fn bring_up(&mut self) -> bool;
}

/// What one stall handling round did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    SoftRecovered,
    SoftFailed { fails: u8 },
    HardReset { reset: bool, brought_up: bool },
}

/// Escalation state.
#[derive(Debug, Clone)]
pub struct LinkWatchdog {
    fails: u8,
    max_fails: u8,
}

impl LinkWatchdog {
    pub fn new(max_fails_before_hard: u8) -> Self {
        Self {
            fails: 0,
            max_fails: max_fails_before_hard.max(1),
        }
    }

    pub fn consecutive_fails(&self) -> u8 {
        self.fails
    }

    /// We tried to talk recently and nothing came back.
    pub fn check_activity(
        tx_age: Duration,
        rx_age: Duration,
        idle: Duration,
    ) -> Result<(), LinkError> {
        if tx_age < idle && rx_age > idle {
            Err(LinkError::LinkStalled)
        } else {
            Ok(())
        }
    }

    /// Run one rung of the recovery ladder.
    pub async fn on_stall<P: RecoveryPort>(&mut self, port: &mut P) -> RecoveryAction {
        if port.soft_recover().await {
            self.fails = 0;
            return RecoveryAction::SoftRecovered;
        }

        self.fails = self.fails.saturating_add(1);
        if self.fails < self.max_fails {
            return RecoveryAction::SoftFailed { fails: self.fails };
        }

        let reset = port.hard_reset().await;
        let brought_up = reset && port.bring_up().await;
        self.fails = 0;
        RecoveryAction::HardReset { reset, brought_up }
    }
}

/// Concrete recovery over a live link context and a modem reset line.
pub struct LinkRecovery<'a, T: SerialTx, M: ModemReset> {
    ctx: &'a LinkContext<T>,
    reset: M,
}

impl<'a, T: SerialTx, M: ModemReset> LinkRecovery<'a, T, M> {
    pub fn new(ctx: &'a LinkContext<T>, reset: M) -> Self {
        Self { ctx, reset }
    }
}

impl<T: SerialTx, M: ModemReset> RecoveryPort for LinkRecovery<'_, T, M> {
    async fn soft_recover(&mut self) -> bool {
        let ctx = self.ctx;
        let was = ctx.state();
        ctx.escape().await;
        let ok = if was == LinkState::TransparentReady {
            ctx.open_transparent_once().await
        } else {
            ctx.send_command("AT", &["OK"], ctx.config.command_timeout())
                .await
                .matched()
        };
        if ok {
            ctx.bump(|s| s.soft_recoveries += 1);
        }
        ok
    }

    async fn hard_reset(&mut self) -> bool {
        if let Err(e) = self.reset.power_cycle().await {
            warn!("WDT: {}", e);
            return false;
        }
        let ctx = self.ctx;
        ctx.set_state(LinkState::Command);
        ctx.request_resync();
        ctx.reset_activity();
        ctx.bump(|s| s.hard_resets += 1);
        true
    }

    async fn bring_up(&mut self) -> bool {
        match bringup::bring_up(self.ctx).await {
            Ok(()) => true,
            Err(e) => {
                warn!("WDT: bring-up after reset failed: {}", e);
                false
            }
        }
    }
}

/// Watchdog task.  Returns once the watchdog is disabled.
pub async fn run_watchdog<T: SerialTx, P: RecoveryPort>(ctx: &LinkContext<T>, mut port: P) {
    let check = Duration::from_millis(ctx.config.watchdog_check_ms as u64);
    let idle = Duration::from_millis(ctx.config.watchdog_idle_ms as u64);
    let mut wd = LinkWatchdog::new(ctx.config.max_fails_before_hard);
    info!(
        "WDT: started (check {} ms, idle {} ms)",
        check.as_millis(),
        idle.as_millis()
    );

    while ctx.watchdog_enabled() {
        async_io_mini::Timer::after(check).await;
        if !ctx.watchdog_enabled() {
            break;
        }
        let (tx_age, rx_age) = (ctx.tx_age(), ctx.rx_age());
        let Err(e) = LinkWatchdog::check_activity(tx_age, rx_age, idle) else {
            continue;
        };
        warn!(
            "WDT: {} (tx {} ms ago, rx {} ms ago)",
            e,
            tx_age.as_millis(),
            rx_age.as_millis()
        );
        match wd.on_stall(&mut port).await {
            RecoveryAction::SoftRecovered => info!("WDT: soft recovery ok"),
            RecoveryAction::SoftFailed { fails } => {
                warn!("WDT: soft recovery failed ({} in a row)", fails);
            }
            RecoveryAction::HardReset { reset: false, .. } => {
                warn!("WDT: no modem reset line, retrying soft recovery next round");
            }
            RecoveryAction::HardReset {
                brought_up,
                reset: true,
            } => warn!("WDT: modem power-cycled, bring-up ok: {}", brought_up),
        }
    }
    info!("WDT: disabled, exiting");
}

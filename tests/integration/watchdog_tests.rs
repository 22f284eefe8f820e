//! Link recovery ladder against the simulated modem.

use core::cell::{Cell, RefCell};
use core::convert::Infallible;
use core::time::Duration;
use std::rc::Rc;

use atbridge::adapters::modem_reset::{GpioModemReset, NoModemReset};
use atbridge::link::LinkState;
use atbridge::link::watchdog::{LinkRecovery, RecoveryPort, run_watchdog};
use embedded_hal::digital::{ErrorType, OutputPin};
use futures_lite::future::zip;

use super::harness::{count, link, run, test_config};

#[derive(Clone, Default)]
struct SharedPin(Rc<RefCell<Vec<bool>>>);

impl ErrorType for SharedPin {
    type Error = Infallible;
}

impl OutputPin for SharedPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.borrow_mut().push(true);
        Ok(())
    }
}

/// Counts soft recoveries and always reports success.
struct CountingPort(Rc<Cell<u32>>);

impl RecoveryPort for CountingPort {
    async fn soft_recover(&mut self) -> bool {
        self.0.set(self.0.get() + 1);
        true
    }

    async fn hard_reset(&mut self) -> bool {
        false
    }

    async fn bring_up(&mut self) -> bool {
        false
    }
}

#[test]
fn soft_recovery_escapes_and_probes() {
    let (sim, ctx, rx) = link(test_config());
    let mut recovery = LinkRecovery::new(&ctx, NoModemReset);

    assert!(run(&ctx, rx, recovery.soft_recover()));
    assert_eq!(sim.escapes(), 1);
    assert_eq!(sim.commands(), ["AT"]);
    assert_eq!(ctx.stats().soft_recoveries, 1);
}

#[test]
fn soft_recovery_fails_on_silent_modem() {
    let mut cfg = test_config();
    cfg.command_timeout_ms = 100;
    let (sim, ctx, rx) = link(cfg);
    sim.set_stalled(true);
    let mut recovery = LinkRecovery::new(&ctx, NoModemReset);

    assert!(!run(&ctx, rx, recovery.soft_recover()));
    assert_eq!(ctx.stats().soft_recoveries, 0);
    assert_eq!(ctx.state(), LinkState::Command);
}

#[test]
fn soft_recovery_reopens_transparent_stream() {
    let (sim, ctx, rx) = link(test_config());
    let mut recovery = LinkRecovery::new(&ctx, NoModemReset);

    let ok = run(&ctx, rx, async {
        assert!(ctx.enter_transparent().await);
        recovery.soft_recover().await
    });
    assert!(ok);
    assert_eq!(ctx.state(), LinkState::TransparentReady);
    assert!(sim.in_transparent());
    assert_eq!(count(&sim.commands(), "AT+CIPMODE=1"), 2);
    assert_eq!(sim.escapes(), 1);
}

#[test]
fn hard_reset_needs_a_wired_line() {
    let (_sim, ctx, rx) = link(test_config());
    let mut recovery = LinkRecovery::new(&ctx, NoModemReset);

    assert!(!run(&ctx, rx, recovery.hard_reset()));
    assert_eq!(ctx.stats().hard_resets, 0);
}

#[test]
fn hard_reset_pulses_enable_and_returns_to_command() {
    let (_sim, ctx, rx) = link(test_config());
    let pin = SharedPin::default();
    let reset = GpioModemReset::with_timing(
        pin.clone(),
        Duration::from_millis(5),
        Duration::from_millis(5),
    );
    let mut recovery = LinkRecovery::new(&ctx, reset);

    let ok = run(&ctx, rx, async {
        assert!(ctx.enter_transparent().await);
        recovery.hard_reset().await
    });
    assert!(ok);
    assert_eq!(*pin.0.borrow(), [false, true]);
    assert_eq!(ctx.state(), LinkState::Command);
    assert_eq!(ctx.stats().hard_resets, 1);
}

#[test]
fn watchdog_recovers_stalled_link_and_stops_when_disabled() {
    let mut cfg = test_config();
    cfg.watchdog_enabled = true;
    cfg.watchdog_check_ms = 10;
    cfg.watchdog_idle_ms = 40;
    let (sim, ctx, rx) = link(cfg);
    sim.set_stalled(true);
    let recoveries = Rc::new(Cell::new(0));

    run(
        &ctx,
        rx,
        zip(run_watchdog(&ctx, CountingPort(recoveries.clone())), async {
            // Keep writing into a silent modem until the watchdog acts.
            while recoveries.get() == 0 {
                let _ = ctx.write_raw(b"AT\r\n");
                async_io_mini::Timer::after(Duration::from_millis(10)).await;
            }
            ctx.set_watchdog_enabled(false);
        }),
    );
    assert!(recoveries.get() >= 1);
    assert!(!ctx.watchdog_enabled());
}

#[test]
fn quiet_link_is_not_stalled() {
    let mut cfg = test_config();
    cfg.watchdog_enabled = true;
    cfg.watchdog_check_ms = 10;
    cfg.watchdog_idle_ms = 30;
    let (_sim, ctx, rx) = link(cfg);
    let recoveries = Rc::new(Cell::new(0));

    run(
        &ctx,
        rx,
        zip(run_watchdog(&ctx, CountingPort(recoveries.clone())), async {
            // Nothing sent, nothing expected back.
            async_io_mini::Timer::after(Duration::from_millis(120)).await;
            ctx.set_watchdog_enabled(false);
        }),
    );
    assert_eq!(recoveries.get(), 0);
}

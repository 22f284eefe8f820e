//! ESP-AT bridge firmware entry point.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  main task: edge_executor::LocalExecutor                     │
//! │                                                              │
//! │   reader ── senders ── watchdog ── bring-up ── echo app      │
//! │      │          │          │                                 │
//! │  ────┴──────────┴──────────┴──── LinkContext ─────────────── │
//! │                         │                                    │
//! │                 UART1 ◀─┴─▶ ESP-AT modem ◀──▶ TCP peer       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::{Context as _, Result, anyhow};
use edge_executor::LocalExecutor;
use esp_idf_hal::gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver};
use esp_idf_hal::uart::{UART0, UART1, UART2, UartDriver, config::Config as UartHwConfig};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use futures_lite::future::block_on;
use log::{error, info, warn};

use atbridge::adapters::modem_reset::{GpioModemReset, ModemReset, NoModemReset};
use atbridge::adapters::uart::EspUart;
use atbridge::config::{LinkConfig, LinkRole};
use atbridge::error::LinkError;
use atbridge::link::autodetect::{autodetect, candidates};
use atbridge::link::bringup;
use atbridge::link::io_task::spawn_link;
use atbridge::link::transport::SerialTx;
use atbridge::link::watchdog::LinkRecovery;
use atbridge::link::{LinkContext, OutboundMessage};

const NVS_NAMESPACE: &str = "atbridge";
const CONFIG_KEY: &str = "linkcfg";
const MAX_CONFIG_BLOB: usize = 512;

// ── Modem reset wiring ────────────────────────────────────────

enum BoardReset {
    Gpio(GpioModemReset<PinDriver<'static, AnyOutputPin, Output>>),
    Unwired(NoModemReset),
}

impl ModemReset for BoardReset {
    async fn power_cycle(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Gpio(r) => r.power_cycle().await,
            Self::Unwired(r) => r.power_cycle().await,
        }
    }
}

fn board_reset(gpio: Option<i32>) -> BoardReset {
    let Some(gpio) = gpio else {
        info!("Modem reset line not wired, hard recovery disabled");
        return BoardReset::Unwired(NoModemReset);
    };
    // SAFETY: the modem enable pin is not claimed anywhere else.
    let pin = unsafe { AnyOutputPin::new(gpio) };
    match PinDriver::output(pin) {
        Ok(mut en) => {
            if let Err(e) = en.set_high() {
                warn!("Modem enable GPIO{} high failed: {}", gpio, e);
            }
            BoardReset::Gpio(GpioModemReset::new(en))
        }
        Err(e) => {
            warn!("Modem enable GPIO{} unavailable ({}), hard recovery disabled", gpio, e);
            BoardReset::Unwired(NoModemReset)
        }
    }
}

// ── Configuration ─────────────────────────────────────────────

fn load_config(partition: EspDefaultNvsPartition) -> LinkConfig {
    let nvs = match EspNvs::<NvsDefault>::new(partition, NVS_NAMESPACE, true) {
        Ok(nvs) => nvs,
        Err(e) => {
            warn!("NVS open failed ({}), using defaults", e);
            return LinkConfig::default();
        }
    };
    let mut buf = [0u8; MAX_CONFIG_BLOB];
    match nvs.get_raw(CONFIG_KEY, &mut buf) {
        Ok(Some(blob)) => match LinkConfig::from_blob(blob) {
            Ok(cfg) => {
                info!("Config loaded from NVS");
                cfg
            }
            Err(e) => {
                warn!("Stored config rejected ({}), using defaults", e);
                LinkConfig::default()
            }
        },
        Ok(None) => {
            info!("No stored config, using defaults");
            LinkConfig::default()
        }
        Err(e) => {
            warn!("NVS read failed ({}), using defaults", e);
            LinkConfig::default()
        }
    }
}

// ── Modem UART ────────────────────────────────────────────

/// Install a UART driver on `port` wired to the modem pins.
///
/// Autodetect opens one candidate at a time; each driver is dropped (and
/// uninstalled) before the next is created.
fn open_uart(port: u8, tx_gpio: i32, rx_gpio: i32, baud: u32) -> Result<EspUart<'static>> {
    let cfg = UartHwConfig::new().baudrate(Hertz(baud));
    // SAFETY: the modem pins are used by this driver only, and no other
    // driver for the same UART is alive while it exists.
    let (tx, rx) = unsafe { (AnyIOPin::new(tx_gpio), AnyIOPin::new(rx_gpio)) };
    let no_pin = || Option::<AnyIOPin>::None;
    let driver = match port {
        // SAFETY: as above, one driver per UART at a time.
        0 => UartDriver::new(unsafe { UART0::new() }, tx, rx, no_pin(), no_pin(), &cfg)?,
        1 => UartDriver::new(unsafe { UART1::new() }, tx, rx, no_pin(), no_pin(), &cfg)?,
        2 => UartDriver::new(unsafe { UART2::new() }, tx, rx, no_pin(), no_pin(), &cfg)?,
        _ => return Err(anyhow!("no UART{port} on this chip")),
    };
    Ok(EspUart::new(driver))
}

// ── Application ───────────────────────────────────────────────

/// Acknowledge every inbound record back to the peer it came from.
async fn echo_app<T: SerialTx>(ctx: &LinkContext<T>) {
    let multi = matches!(ctx.config.role, LinkRole::Server { .. });
    loop {
        let inbound = ctx.inbound.receive().await;
        info!("APP: record on link {}: {}", inbound.link_id, inbound.record);
        let reply = serde_json::json!({ "ack": inbound.record });
        let mut payload = match serde_json::to_vec(&reply) {
            Ok(p) => p,
            Err(e) => {
                warn!("APP: reply encode failed: {}", e);
                continue;
            }
        };
        payload.extend_from_slice(b"\r\n");
        let link_id = multi.then_some(inbound.link_id);
        ctx.outbound.send(OutboundMessage::new(link_id, payload)).await;
    }
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("ESP-AT bridge v{}", env!("CARGO_PKG_VERSION"));

    let nvs = EspDefaultNvsPartition::take().context("NVS partition unavailable")?;

    // ── 2. Configuration ──────────────────────────────────────
    let mut config = load_config(nvs);
    config.validate().map_err(|e| anyhow!("invalid config: {e}"))?;

    // ── 3. Modem UART autodetect ──────────────────────────────
    let (tx_gpio, rx_gpio) = config
        .uart
        .tx_gpio
        .zip(config.uart.rx_gpio)
        .ok_or_else(|| anyhow!("modem UART pins not configured"))?;
    let ports = candidates(config.uart.port, &config.candidate_ports);
    let bauds = candidates(config.uart.baud, &config.candidate_bauds);
    let found = block_on(autodetect(&ports, &bauds, config.escape_guard(), |port, baud| {
        match open_uart(port, tx_gpio, rx_gpio, baud) {
            Ok(uart) => Some(uart),
            Err(e) => {
                warn!("UART{} @ {}: {}", port, baud, e);
                None
            }
        }
    }));
    match found {
        Some((port, baud)) => {
            config.uart.port = port;
            config.uart.baud = baud;
        }
        None => warn!(
            "No AT reply on any candidate, keeping UART{} @ {}",
            config.uart.port, config.uart.baud
        ),
    }
    let uart = open_uart(config.uart.port, tx_gpio, rx_gpio, config.uart.baud)?;

    // ── 4. Link engine ────────────────────────────────────────
    let reset = board_reset(config.modem_enable_gpio);
    let (tx, rx) = uart.into_split();
    let ctx = LinkContext::new(config, tx);
    let executor: LocalExecutor<'_, 8> = LocalExecutor::new();
    spawn_link(&executor, &ctx, rx, LinkRecovery::new(&ctx, reset));

    info!("System ready. Bringing the link up.");

    block_on(executor.run(async {
        if let Err(e) = bringup::bring_up(&ctx).await {
            error!("BRINGUP: {}; link left in command mode until restart", e);
        }
        echo_app(&ctx).await;
    }));

    Ok(())
}

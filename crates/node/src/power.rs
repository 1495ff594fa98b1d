//! Power-down handoff to the external timer. On timer power the DONE pulse
//! cuts the supply and nothing after it runs; on unswitched power the node
//! sleeps out the period and loops.

use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::config::PowerSection;

/// How long DONE is held high. The timer latches on a rising edge.
#[cfg_attr(not(feature = "gpio"), allow(dead_code))]
const DONE_PULSE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Real power timer (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct PowerTimer {
    done: OutputPin,
}

#[cfg(feature = "gpio")]
impl PowerTimer {
    pub fn new(cfg: &PowerSection) -> Result<Self> {
        let mut done = Gpio::new()?.get(cfg.done_gpio_pin)?.into_output();
        done.set_low();
        Ok(Self { done })
    }

    pub async fn signal_done(&mut self) {
        self.done.set_high();
        tokio::time::sleep(DONE_PULSE).await;
        self.done.set_low();
    }
}

// ---------------------------------------------------------------------------
// Mock power timer (development — no hardware, counts DONE signals)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct PowerTimer {
    pub(crate) signals: u32,
}

#[cfg(not(feature = "gpio"))]
impl PowerTimer {
    pub fn new(cfg: &PowerSection) -> Result<Self> {
        info!(gpio = cfg.done_gpio_pin, "[mock-gpio] power timer initialised (no hardware)");
        Ok(Self { signals: 0 })
    }

    pub async fn signal_done(&mut self) {
        info!("[mock-gpio] DONE");
        self.signals += 1;
    }
}

impl PowerTimer {
    /// Tell the timer the cycle is over, then wait out `period_min` in case
    /// the node is on unswitched power and is still running.
    pub async fn end_cycle(&mut self, period_min: u32) {
        info!("sleeping for {period_min} mins");
        self.signal_done().await;
        tokio::time::sleep(Duration::from_secs(u64::from(period_min) * 60)).await;
    }

    /// Log a fatal startup error and pulse DONE so a timer-powered node is
    /// switched off until its next wake. Hands the error back for `main`.
    pub async fn fail_boot(&mut self, err: anyhow::Error) -> anyhow::Error {
        error!("startup failed: {err:#}");
        self.signal_done().await;
        err
    }
}

/// [`PowerTimer::fail_boot`] for when no timer is open yet: open one on
/// `cfg` first. If even that fails, both errors are logged.
pub async fn fail_boot_on(cfg: &PowerSection, err: anyhow::Error) -> anyhow::Error {
    match PowerTimer::new(cfg) {
        Ok(mut power) => power.fail_boot(err).await,
        Err(e) => {
            error!("startup failed: {err:#}");
            error!(gpio = cfg.done_gpio_pin, "power timer unavailable: {e:#}");
            err
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

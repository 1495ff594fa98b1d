//! Pump control via GPIO. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation logs and records each run.

use anyhow::Result;
use std::time::Duration;
use tracing::info;

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::config::PumpSection;

// ---------------------------------------------------------------------------
// Real GPIO pump driver (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub struct Pump {
    pin: OutputPin,
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl Pump {
    pub fn new(cfg: &PumpSection) -> Result<Self> {
        let pin = Gpio::new()?.get(cfg.gpio_pin)?.into_output();
        let mut pump = Self {
            pin,
            active_low: cfg.active_low,
        };
        // Fail-safe: ensure OFF at startup.
        pump.set(false);
        Ok(pump)
    }

    fn set(&mut self, on: bool) {
        // active-low driver: LOW = ON; active-high: HIGH = ON
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    /// Run the pump for `run`, then switch it off.
    pub async fn run_for(&mut self, run: Duration) {
        info!(secs = run.as_secs_f64(), "pump ON");
        self.set(true);
        tokio::time::sleep(run).await;
        self.set(false);
        info!("pump OFF");
    }
}

// ---------------------------------------------------------------------------
// Mock pump (development — no hardware, records runs)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub struct Pump {
    pub(crate) runs: Vec<Duration>,
}

#[cfg(not(feature = "gpio"))]
impl Pump {
    pub fn new(cfg: &PumpSection) -> Result<Self> {
        info!(gpio = cfg.gpio_pin, "[mock-gpio] pump initialised (no hardware)");
        Ok(Self { runs: Vec::new() })
    }

    pub async fn run_for(&mut self, run: Duration) {
        info!(secs = run.as_secs_f64(), "[mock-gpio] pump ON");
        tokio::time::sleep(run).await;
        info!("[mock-gpio] pump OFF");
        self.runs.push(run);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

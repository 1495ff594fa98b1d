//! Irrigation decision: compare soil moisture to the setpoint and run the
//! pump for a time proportional to the deficit.

use std::time::Duration;
use tracing::{info, warn};

use crate::config::{CycleSection, PumpSection};
use crate::pump::Pump;

/// Pump run time in seconds for a moisture reading.
///
/// Zero at or above the setpoint and for an unknown (NaN) reading. Below it
/// the time grows linearly with the deficit and is capped at `max_run_secs`.
pub fn pump_secs(moisture_pct: f64, setpoint_pct: f64, secs_per_pct: f64, max_run_secs: f64) -> f64 {
    if moisture_pct.is_nan() || moisture_pct >= setpoint_pct {
        return 0.0;
    }
    ((setpoint_pct - moisture_pct) * secs_per_pct).min(max_run_secs)
}

pub struct Irrigator {
    setpoint_pct: f64,
    secs_per_pct: f64,
    max_run_secs: f64,
    pump: Pump,
}

impl Irrigator {
    pub fn new(cycle: &CycleSection, pump_cfg: &PumpSection, pump: Pump) -> Self {
        Self {
            setpoint_pct: cycle.moisture_setpoint,
            secs_per_pct: pump_cfg.secs_per_pct,
            max_run_secs: pump_cfg.max_run_secs,
            pump,
        }
    }

    /// Decide, actuate, and return how long the pump actually ran.
    pub async fn run_pump_control(&mut self, moisture_pct: f64) -> f64 {
        if moisture_pct.is_nan() {
            warn!("moisture unknown, pump not actuated");
            return 0.0;
        }

        let secs = pump_secs(
            moisture_pct,
            self.setpoint_pct,
            self.secs_per_pct,
            self.max_run_secs,
        );
        if secs <= 0.0 {
            info!(
                moisture = format!("{moisture_pct:.2}"),
                setpoint = self.setpoint_pct,
                "moisture at or above setpoint, pump stays off"
            );
            return 0.0;
        }

        self.pump.run_for(Duration::from_secs_f64(secs)).await;
        secs
    }

    #[cfg(all(test, not(feature = "gpio")))]
    pub(crate) fn pump(&self) -> &Pump {
        &self.pump
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! Stateful sensor simulator for running a node without hardware.
//!
//! The soil channel models a capacitive sensor behind an ADS1115:
//! - Temporal coherence via random walk with mean reversion
//! - Gradual drying drift (evaporation)
//! - Per-reading ADC electronic noise
//! - Occasional spikes (sensor flakiness)
//! - Closed-loop watering response (readings drop after the pump runs)
//!
//! The remaining quantities are plausible noisy values with a diurnal swing on
//! light and temperature.

use std::fmt;

use crate::sensors::{Quantity, SensorBus};

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and drifts toward dry. ~3% spike rate.
    Drying,
    /// Hovers near the centre with low noise.
    Stable,
    /// High noise and ~10% spike rate; also drops the odd soil read.
    Flaky,
    /// Starts near the wet end. The pump should stay off.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Seconds in a simulated day.
const DAY_S: f64 = 86_400.0;

/// ADC counts the soil reading drops per second of pumping.
const WET_COUNTS_PER_SEC: f64 = -400.0;

pub struct SoilMoistureSim {
    /// Current "true" soil reading in ADC units. Evolves each sample.
    base: f64,
    raw_dry: f64,
    raw_wet: f64,
    center: f64,

    drift_per_sample: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,

    spike_prob: f32,
    spike_sigma: f64,
    /// Chance a soil read fails outright (reported as NaN).
    dropout_prob: f32,
}

impl SoilMoistureSim {
    /// `raw_dry` / `raw_wet` should match the soil calibration in the config
    /// (typically 26000 / 12000 for an ADS1115).
    pub fn new(scenario: Scenario, raw_dry: f64, raw_wet: f64) -> Self {
        let range = raw_dry - raw_wet;
        let center = (raw_dry + raw_wet) / 2.0;

        let (drift, walk_sigma, mean_rev, noise_sigma, spike_prob, spike_sigma, dropout, start_frac) =
            match scenario {
                // start_frac: 0.0 = at raw_wet (wettest), 1.0 = at raw_dry (driest)
                Scenario::Drying => (400.0, 150.0, 0.02, 80.0, 0.03_f32, 2000.0, 0.0_f32, 0.6),
                Scenario::Stable => (2.0, 60.0, 0.05, 40.0, 0.005, 1000.0, 0.0, 0.5),
                Scenario::Flaky => (10.0, 250.0, 0.02, 200.0, 0.10, 3000.0, 0.05, 0.5),
                Scenario::Wet => (3.0, 80.0, 0.02, 60.0, 0.02, 1500.0, 0.0, 0.15),
            };

        let start = raw_wet + start_frac * range + gaussian(0.0, range * 0.03);

        Self {
            base: start.clamp(raw_wet.min(raw_dry), raw_dry.max(raw_wet)),
            raw_dry,
            raw_wet,
            center,
            drift_per_sample: drift,
            walk_sigma,
            mean_reversion: mean_rev,
            noise_sigma,
            spike_prob,
            spike_sigma,
            dropout_prob: dropout,
        }
    }

    /// Produce the next soil ADC reading. The underlying state evolves with
    /// each call.
    pub fn sample_soil(&mut self) -> f64 {
        if fastrand::f32() < self.dropout_prob {
            return f64::NAN;
        }

        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        let (lo, hi) = (self.raw_wet.min(self.raw_dry), self.raw_dry.max(self.raw_wet));
        self.base = (self.base + self.drift_per_sample + pull + walk).clamp(lo - 500.0, hi + 500.0);

        let noise = gaussian(0.0, self.noise_sigma);
        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        // Physically possible ADS1115 single-ended range.
        (self.base + noise + spike).round().clamp(0.0, 32767.0)
    }

    /// Fraction of the simulated day in [0, 1); 0.5 is solar noon.
    fn day_phase() -> f64 {
        let now_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        (now_s % DAY_S) / DAY_S
    }
}

impl SensorBus for SoilMoistureSim {
    fn read(&mut self, quantity: Quantity) -> f64 {
        let sun = (std::f64::consts::PI * 2.0 * (Self::day_phase() - 0.25)).sin();
        match quantity {
            Quantity::SoilRaw => self.sample_soil(),
            Quantity::SupplyVolts => gaussian(4.6, 0.05),
            Quantity::Lux => (sun * 20_000.0 + gaussian(0.0, 200.0)).max(0.0),
            Quantity::TemperatureC => 18.0 + 6.0 * sun + gaussian(0.0, 0.3),
            Quantity::PressurePa => gaussian(101_325.0, 150.0),
            Quantity::HumidityRh => (60.0 - 15.0 * sun + gaussian(0.0, 2.0)).clamp(0.0, 100.0),
            Quantity::Aqi => f64::from(fastrand::u8(1..=2)),
            Quantity::TvocPpb => gaussian(120.0, 20.0).max(0.0),
            Quantity::Eco2Ppm => gaussian(450.0, 30.0).max(400.0),
            // Time-of-flight sensors report NaN for out-of-range targets.
            Quantity::DistanceMm => {
                if fastrand::f32() < 0.2 {
                    f64::NAN
                } else {
                    gaussian(180.0, 5.0).round()
                }
            }
        }
    }

    fn pump_ran(&mut self, secs: f64) {
        let (lo, hi) = (self.raw_wet.min(self.raw_dry), self.raw_dry.max(self.raw_wet));
        self.base = (self.base + WET_COUNTS_PER_SEC * secs).clamp(lo - 500.0, hi + 500.0);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_soil(sim: &mut SoilMoistureSim, n: usize) -> Vec<f64> {
        (0..n).map(|_| sim.sample_soil()).collect()
    }

    #[test]
    fn soil_readings_within_adc_range() {
        let mut sim = SoilMoistureSim::new(Scenario::Drying, 26000.0, 12000.0);
        for v in collect_soil(&mut sim, 500) {
            assert!((0.0..=32767.0).contains(&v), "ADC out of range: {v}");
        }
    }

    #[test]
    fn temporal_coherence() {
        let mut sim = SoilMoistureSim::new(Scenario::Stable, 26000.0, 12000.0);
        let samples = collect_soil(&mut sim, 100);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        // Allow for rare spikes; still well under the 14000 count range.
        assert!(max_jump < 5000.0, "max consecutive jump too large: {max_jump}");
    }

    #[test]
    fn pumping_lowers_soil_readings() {
        let mut sim = SoilMoistureSim::new(Scenario::Stable, 26000.0, 12000.0);
        for _ in 0..20 {
            sim.sample_soil();
        }
        let before: f64 = collect_soil(&mut sim, 20).iter().sum::<f64>() / 20.0;
        sim.pump_ran(10.0);
        let after: f64 = collect_soil(&mut sim, 5).iter().sum::<f64>() / 5.0;
        assert!(
            after < before,
            "pumping should lower readings: before={before:.0} after={after:.0}"
        );
    }

    #[test]
    fn flaky_scenario_drops_some_reads() {
        let mut sim = SoilMoistureSim::new(Scenario::Flaky, 26000.0, 12000.0);
        let dropped = collect_soil(&mut sim, 2000).iter().filter(|v| v.is_nan()).count();
        assert!(dropped > 0, "flaky scenario should drop at least one read");
    }

    #[test]
    fn wet_scenario_starts_low() {
        let mut sim = SoilMoistureSim::new(Scenario::Wet, 26000.0, 12000.0);
        let avg: f64 = collect_soil(&mut sim, 10).iter().sum::<f64>() / 10.0;
        assert!(avg < 19000.0, "wet scenario should start below midpoint: avg={avg:.0}");
    }

    #[test]
    fn optional_quantities_are_plausible() {
        let mut sim = SoilMoistureSim::new(Scenario::Stable, 26000.0, 12000.0);
        for _ in 0..50 {
            assert!(sim.read(Quantity::Lux) >= 0.0);
            let rh = sim.read(Quantity::HumidityRh);
            assert!((0.0..=100.0).contains(&rh), "humidity out of range: {rh}");
            assert!(sim.read(Quantity::Eco2Ppm) >= 400.0);
            let aqi = sim.read(Quantity::Aqi);
            assert!(aqi == 1.0 || aqi == 2.0);
        }
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Drying);
        assert_eq!(Scenario::from_str_lossy("STABLE"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("Flaky"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("wet"), Scenario::Wet);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Drying);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Drying.to_string(), "drying");
        assert_eq!(Scenario::Wet.to_string(), "wet");
    }
}

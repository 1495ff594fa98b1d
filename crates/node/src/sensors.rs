//! Sensor hub: the soil sensor, the supply rail, and a fixed registry of
//! optional sensor slots.
//!
//! Every reading is an `f64`; NaN means "not attached" or "read failed".
//! Callers decide how to substitute a default.

use tracing::{debug, warn};

use crate::config::{SensorSlots, SoilSection};

/// Every quantity a node can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    SoilRaw,
    SupplyVolts,
    Lux,
    TemperatureC,
    PressurePa,
    HumidityRh,
    Aqi,
    TvocPpb,
    Eco2Ppm,
    DistanceMm,
}

/// Hardware (or simulated) source of raw readings.
pub trait SensorBus {
    /// Read one quantity. Returns NaN when the read fails or nothing is
    /// wired for it.
    fn read(&mut self, quantity: Quantity) -> f64;

    /// Told how long the pump just ran. Only the simulator cares.
    fn pump_ran(&mut self, _secs: f64) {}
}

/// Convert a raw ADC count into moisture percent using the sensor's dry/wet
/// calibration. Clamped to [0, 100]; NaN in gives NaN out.
pub fn compute_moisture_pct(raw: f64, raw_dry: i64, raw_wet: i64) -> f64 {
    let range = (raw_dry - raw_wet) as f64;
    if range == 0.0 {
        return f64::NAN;
    }
    ((raw_dry as f64 - raw) / range).clamp(0.0, 1.0) * 100.0
}

/// Values from every optional slot for one cycle. Absent slots hold NaN.
#[derive(Debug, Clone, Copy)]
pub struct Environment {
    pub lux: f64,
    pub temperature_c: f64,
    pub pressure_pa: f64,
    pub humidity_rh: f64,
    pub aqi: f64,
    pub tvoc_ppb: f64,
    pub eco2_ppm: f64,
    pub distance_mm: f64,
}

pub struct SensorHub<B> {
    bus: B,
    slots: SensorSlots,
    soil: SoilSection,
}

impl<B: SensorBus> SensorHub<B> {
    pub fn new(bus: B, slots: SensorSlots, soil: SoilSection) -> Self {
        debug!(?slots, "sensor hub ready");
        Self { bus, slots, soil }
    }

    /// Soil moisture in percent, or NaN when the sensor could not be read.
    pub fn measure_soil(&mut self) -> f64 {
        let raw = self.bus.read(Quantity::SoilRaw);
        if raw.is_nan() {
            warn!("soil sensor read failed");
        }
        compute_moisture_pct(raw, self.soil.raw_dry, self.soil.raw_wet)
    }

    pub fn measure_system_voltage(&mut self) -> f64 {
        self.bus.read(Quantity::SupplyVolts)
    }

    pub fn measure_environment(&mut self) -> Environment {
        let slots = self.slots;
        let mut slot = |present: bool, q: Quantity| {
            if present {
                self.bus.read(q)
            } else {
                f64::NAN
            }
        };

        Environment {
            lux: slot(slots.light, Quantity::Lux),
            temperature_c: slot(slots.weather, Quantity::TemperatureC),
            pressure_pa: slot(slots.weather, Quantity::PressurePa),
            humidity_rh: slot(slots.weather, Quantity::HumidityRh),
            aqi: slot(slots.air_quality, Quantity::Aqi),
            tvoc_ppb: slot(slots.air_quality, Quantity::TvocPpb),
            eco2_ppm: slot(slots.air_quality, Quantity::Eco2Ppm),
            distance_mm: slot(slots.distance, Quantity::DistanceMm),
        }
    }

    pub fn pump_ran(&mut self, secs: f64) {
        if secs > 0.0 {
            self.bus.pump_ran(secs);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

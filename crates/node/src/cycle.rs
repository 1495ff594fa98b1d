//! One wake cycle: link, time, soil, pump, log, upload, power down.
//!
//! Every run starts from nothing but the cycle log on disk, so a cycle cut
//! short by power loss costs that cycle and nothing more.
//!
//! ```text
//! ensure_connected ─▶ current_time ─▶ soil + pump ─▶ environment
//!        ─▶ log append ─▶ upload ─▶ end_cycle (power off or sleep)
//! ```

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::clock::TimeSource;
use crate::config::Settings;
use crate::cycle_log::{CycleLog, LogError};
use crate::irrigation::Irrigator;
use crate::link::{ensure_connected, Link};
use crate::power::PowerTimer;
use crate::pump::Pump;
use crate::record::{self, CycleRecord, Schema};
use crate::sensors::{SensorBus, SensorHub};
use crate::telemetry::Uploader;

/// What one cycle did, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Link retries before the cycle could start.
    pub link_retries: u32,
    pub timestamp: u64,
    pub moisture_pct: f64,
    pub pump_secs: f64,
    /// `None` when the log append failed.
    pub period_index: Option<i64>,
    pub uploaded: bool,
}

pub struct Node<'a, L, B> {
    settings: &'a Settings,
    schema: Schema,
    link: L,
    clock: TimeSource,
    hub: SensorHub<B>,
    irrigator: Irrigator,
    uploader: Uploader,
}

impl<'a, L: Link, B: SensorBus> Node<'a, L, B> {
    pub fn new(settings: &'a Settings, link: L, bus: B, pump: Pump) -> Result<Self> {
        let cfg = &settings.config;
        let schema = Schema::from_keys(&cfg.cycle.columns).context("building log schema")?;
        Ok(Self {
            settings,
            schema,
            link,
            clock: TimeSource::new(&cfg.time),
            hub: SensorHub::new(bus, cfg.sensors, cfg.soil.clone()),
            irrigator: Irrigator::new(&cfg.cycle, &cfg.pump, pump),
            uploader: Uploader::new(&settings.credentials, &cfg.cycle, &cfg.upload),
        })
    }

    /// Run one cycle and hand off to the power timer. On timer power this
    /// never returns in practice.
    pub async fn cycle_once(&mut self, power: &mut PowerTimer) -> CycleReport {
        let report = self.run_cycle().await;
        power.end_cycle(self.settings.config.cycle.period_min).await;
        report
    }

    /// Everything up to (not including) power-down. Never fails: each step
    /// degrades on its own and the cycle carries on.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let settings = self.settings;

        // Only returns once the link is up.
        let link_retries = ensure_connected(&mut self.link, &settings.credentials).await;
        let timestamp = self.clock.current_time(true).await;

        let moisture_pct = self.hub.measure_soil();
        let voltage = self.hub.measure_system_voltage();
        let pump_secs = self.irrigator.run_pump_control(moisture_pct).await;
        self.hub.pump_ran(pump_secs);
        info!(
            moisture = format!("{moisture_pct:.2}"),
            pump_secs = format!("{pump_secs:.2}"),
            voltage = format!("{voltage:.2}"),
            "soil checked"
        );

        let env = self.hub.measure_environment();
        let measured = [
            (record::MOISTURE, moisture_pct),
            (record::PUMP, pump_secs),
            (record::VOLTAGE, voltage),
            (record::LIGHT, env.lux),
            (record::TEMPERATURE, env.temperature_c),
            (record::PRESSURE, env.pressure_pa),
            (record::HUMIDITY, env.humidity_rh),
            (record::AQI, env.aqi),
            (record::TVOC, env.tvoc_ppb),
            (record::ECO2, env.eco2_ppm),
            (record::DISTANCE, env.distance_mm),
        ];
        let mut rec = CycleRecord::new();
        for (heading, value) in measured {
            if self.schema.contains(heading) {
                rec.insert_or_zero(heading, value);
            }
        }

        // Log before upload so the record is durable whatever the network does.
        let period_index = match self.save(&rec) {
            Ok(index) => {
                info!(period_index = index, "record saved");
                Some(index)
            }
            Err(e) => {
                error!(path = %settings.config.cycle.log_path.display(), "record not saved: {e}");
                None
            }
        };

        let uploaded = match self.uploader.upload(&self.schema, &rec, timestamp).await {
            Ok(()) => true,
            Err(e) => {
                warn!("upload failed: {e}");
                false
            }
        };

        CycleReport {
            link_retries,
            timestamp,
            moisture_pct,
            pump_secs,
            period_index,
            uploaded,
        }
    }

    fn save(&self, rec: &CycleRecord) -> Result<i64, LogError> {
        let cycle = &self.settings.config.cycle;
        let mut log = CycleLog::open(&cycle.log_path, &self.schema, cycle.period_min)?;
        log.append(rec)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

//! TOML config and credentials loading, validation, and the immutable
//! `Settings` value handed to every stage of a cycle.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::record::Schema;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cycle: CycleSection,
    pub pump: PumpSection,
    #[serde(default)]
    pub soil: SoilSection,
    #[serde(default)]
    pub supply: SupplySection,
    #[serde(default)]
    pub power: PowerSection,
    #[serde(default)]
    pub sensors: SensorSlots,
    #[serde(default)]
    pub time: TimeSection,
    #[serde(default)]
    pub upload: UploadSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleSection {
    /// Soil moisture percentage below which the pump runs.
    pub moisture_setpoint: f64,
    /// Interval programmed on the external power timer, in minutes.
    pub period_min: u32,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_sensor_id")]
    pub sensor_id: String,
    /// Log and upload columns, by short key, in order. Defaults to every
    /// standard column.
    #[serde(default = "Schema::standard_keys")]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PumpSection {
    /// Seconds of pumping per percentage point of moisture deficit.
    pub secs_per_pct: f64,
    /// Hard upper bound on a single pump run.
    pub max_run_secs: f64,
    #[serde(default = "default_pump_pin")]
    pub gpio_pin: u8,
    #[serde(default)]
    pub active_low: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoilSection {
    pub channel: usize,
    pub raw_dry: i64,
    pub raw_wet: i64,
}

impl Default for SoilSection {
    fn default() -> Self {
        Self {
            channel: 0,
            raw_dry: 26000,
            raw_wet: 12000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupplySection {
    pub channel: usize,
    /// Ratio of the resistor divider between the supply rail and the ADC pin.
    pub divider: f64,
}

impl Default for SupplySection {
    fn default() -> Self {
        Self {
            channel: 1,
            divider: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerSection {
    pub done_gpio_pin: u8,
}

impl Default for PowerSection {
    fn default() -> Self {
        Self { done_gpio_pin: 4 }
    }
}

/// Optional sensors attached to this node. Fixed for the life of the process.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SensorSlots {
    #[serde(default)]
    pub weather: bool,
    #[serde(default)]
    pub air_quality: bool,
    #[serde(default)]
    pub light: bool,
    #[serde(default)]
    pub distance: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSection {
    pub server: String,
    pub timeout_ms: u64,
}

impl Default for TimeSection {
    fn default() -> Self {
        Self {
            server: "pool.ntp.org:123".into(),
            timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    pub timeout_ms: u64,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("log.txt")
}

fn default_measurement() -> String {
    "plant".into()
}

fn default_sensor_id() -> String {
    "RPI2W".into()
}

fn default_pump_pin() -> u8 {
    18
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Network identity and telemetry secrets, kept in a separate file so the
/// main config can be shared without leaking them.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
    pub telemetry_url: String,
    pub api_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("telemetry_url", &self.telemetry_url)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.ssid.trim().is_empty() {
            errors.push("ssid is empty".into());
        }
        if self.api_token.trim().is_empty() {
            errors.push("api_token is empty".into());
        }
        if !(self.telemetry_url.starts_with("http://")
            || self.telemetry_url.starts_with("https://"))
        {
            errors.push(format!(
                "telemetry_url '{}' must start with http:// or https://",
                self.telemetry_url
            ));
        }

        report(errors, "credentials")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// BCM GPIO pins exposed on the Raspberry Pi 40-pin header. GPIO 0-1 are
/// reserved for the ID EEPROM.
const VALID_GPIO_PINS: std::ops::RangeInclusive<u8> = 2..=27;

/// Maximum single-ended reading from the ADS1115 (15-bit unsigned).
const ADS1115_MAX: i64 = 32767;

/// Highest ADS1115 single-ended input.
const MAX_CHANNEL: usize = 3;

impl Config {
    /// Validate every section. Returns an error describing every violation
    /// found, not just the first one.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_cycle(&mut errors);
        self.validate_pump(&mut errors);
        self.validate_analog(&mut errors);

        if self.power.done_gpio_pin == self.pump.gpio_pin {
            errors.push(format!(
                "power.done_gpio_pin {} is already used by the pump",
                self.power.done_gpio_pin
            ));
        }
        if !VALID_GPIO_PINS.contains(&self.power.done_gpio_pin) {
            errors.push(format!(
                "power.done_gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                self.power.done_gpio_pin
            ));
        }
        if self.time.server.trim().is_empty() {
            errors.push("time.server is empty".into());
        }
        if self.time.timeout_ms == 0 {
            errors.push("time.timeout_ms must be positive".into());
        }
        if self.upload.timeout_ms == 0 {
            errors.push("upload.timeout_ms must be positive".into());
        }

        report(errors, "config")
    }

    fn validate_cycle(&self, errors: &mut Vec<String>) {
        let c = &self.cycle;
        if !(0.0..=100.0).contains(&c.moisture_setpoint) {
            errors.push(format!(
                "cycle.moisture_setpoint {} out of range [0, 100]",
                c.moisture_setpoint
            ));
        }
        if c.period_min == 0 {
            errors.push("cycle.period_min must be positive".into());
        }
        if c.log_path.as_os_str().is_empty() {
            errors.push("cycle.log_path is empty".into());
        }
        if c.measurement.trim().is_empty() {
            errors.push("cycle.measurement is empty".into());
        }
        if c.sensor_id.trim().is_empty() {
            errors.push("cycle.sensor_id is empty".into());
        }
        if let Err(e) = Schema::from_keys(&c.columns) {
            errors.push(format!("cycle.columns: {e}"));
        }
    }

    fn validate_pump(&self, errors: &mut Vec<String>) {
        let p = &self.pump;
        if p.secs_per_pct.is_nan() || p.secs_per_pct <= 0.0 {
            errors.push(format!(
                "pump.secs_per_pct must be positive, got {}",
                p.secs_per_pct
            ));
        }
        if p.max_run_secs.is_nan() || p.max_run_secs <= 0.0 {
            errors.push(format!(
                "pump.max_run_secs must be positive, got {}",
                p.max_run_secs
            ));
        }
        if !VALID_GPIO_PINS.contains(&p.gpio_pin) {
            errors.push(format!(
                "pump.gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                p.gpio_pin
            ));
        }
    }

    fn validate_analog(&self, errors: &mut Vec<String>) {
        let s = &self.soil;
        if s.channel > MAX_CHANNEL {
            errors.push(format!(
                "soil.channel {} exceeds maximum ({MAX_CHANNEL})",
                s.channel
            ));
        }
        if s.raw_dry < 0 || s.raw_dry > ADS1115_MAX {
            errors.push(format!(
                "soil.raw_dry {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_dry
            ));
        }
        if s.raw_wet < 0 || s.raw_wet > ADS1115_MAX {
            errors.push(format!(
                "soil.raw_wet {} out of ADS1115 range [0, {ADS1115_MAX}]",
                s.raw_wet
            ));
        }
        if s.raw_dry == s.raw_wet {
            errors.push(format!(
                "soil.raw_dry and soil.raw_wet are both {}, calibration range is zero",
                s.raw_dry
            ));
        }

        let v = &self.supply;
        if v.channel > MAX_CHANNEL {
            errors.push(format!(
                "supply.channel {} exceeds maximum ({MAX_CHANNEL})",
                v.channel
            ));
        } else if v.channel == s.channel {
            errors.push(format!(
                "supply.channel {} is already used by the soil sensor",
                v.channel
            ));
        }
        if v.divider.is_nan() || v.divider <= 0.0 {
            errors.push(format!("supply.divider must be positive, got {}", v.divider));
        }
    }
}

fn report(errors: Vec<String>, what: &str) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        bail!(
            "{what} validation failed ({} error{}):\n  - {}",
            errors.len(),
            if errors.len() == 1 { "" } else { "s" },
            errors.join("\n  - ")
        );
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Everything a cycle needs to know, loaded once at boot and never mutated.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: Config,
    pub credentials: Credentials,
}

impl Settings {
    pub fn load(config_path: &Path, credentials_path: &Path) -> Result<Self> {
        Ok(Self {
            config: load(config_path)?,
            credentials: load_credentials(credentials_path)?,
        })
    }
}

/// Read, parse, and validate a TOML config file.
pub fn load(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    Ok(config)
}

/// Read, parse, and validate the credentials file.
pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials: {}", path.display()))?;
    let creds: Credentials = toml::from_str(&contents)
        .with_context(|| format!("failed to parse credentials: {}", path.display()))?;
    creds
        .validate()
        .with_context(|| format!("invalid credentials: {}", path.display()))?;
    Ok(creds)
}

// ===========================================================================
// Tests
// ===========================================================================

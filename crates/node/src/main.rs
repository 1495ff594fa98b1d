#[cfg(feature = "adc")]
mod adc;
mod clock;
mod config;
mod cycle;
mod cycle_log;
mod irrigation;
mod link;
mod power;
mod pump;
mod record;
mod sensors;
#[cfg(all(feature = "sim", not(feature = "adc")))]
mod sim;
mod telemetry;

#[cfg(not(any(feature = "sim", feature = "adc")))]
compile_error!("Select a sensor backend feature: sim or adc.");

use anyhow::Result;
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{PowerSection, Settings};
use cycle::Node;
use power::{fail_boot_on, PowerTimer};
use pump::Pump;

#[cfg(all(feature = "sim", not(feature = "adc")))]
fn build_link() -> link::SimLink {
    info!("using simulated link");
    link::SimLink
}

#[cfg(feature = "adc")]
fn build_link() -> link::NmcliLink {
    let iface = env::var("WIFI_IFACE").unwrap_or_else(|_| "wlan0".to_string());
    info!(%iface, "using NetworkManager link");
    link::NmcliLink::new(iface)
}

#[cfg(all(feature = "sim", not(feature = "adc")))]
fn build_bus(settings: &Settings) -> Result<sim::SoilMoistureSim> {
    let scenario = env::var("SIM_SCENARIO")
        .map(|s| sim::Scenario::from_str_lossy(&s))
        .unwrap_or(sim::Scenario::Drying);
    let soil = &settings.config.soil;
    info!(%scenario, "using simulated sensors");
    Ok(sim::SoilMoistureSim::new(
        scenario,
        soil.raw_dry as f64,
        soil.raw_wet as f64,
    ))
}

#[cfg(feature = "adc")]
fn build_bus(settings: &Settings) -> Result<adc::Ads1115> {
    let cfg = &settings.config;
    adc::Ads1115::new(adc::DEFAULT_ADDR, &cfg.soil, &cfg.supply)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Settings ────────────────────────────────────────────────────
    let config_path =
        PathBuf::from(env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string()));
    let credentials_path = PathBuf::from(
        env::var("CREDENTIALS_PATH").unwrap_or_else(|_| "credentials.toml".to_string()),
    );

    // Every boot failure below pulses DONE before returning, so a node on
    // timer power sleeps until its next wake instead of draining the battery.
    let settings = match Settings::load(&config_path, &credentials_path) {
        Ok(s) => s,
        Err(e) => return Err(fail_boot_on(&PowerSection::default(), e).await),
    };
    let cfg = &settings.config;
    info!(
        setpoint = cfg.cycle.moisture_setpoint,
        period_min = cfg.cycle.period_min,
        log = %cfg.cycle.log_path.display(),
        sensors = ?cfg.sensors,
        "irrigation node starting"
    );

    // ── Hardware ────────────────────────────────────────────────────
    let mut power = match PowerTimer::new(&cfg.power) {
        Ok(p) => p,
        Err(e) => return Err(fail_boot_on(&PowerSection::default(), e).await),
    };
    let hardware = Pump::new(&cfg.pump).and_then(|pump| Ok((pump, build_bus(&settings)?)));
    let (pump, bus) = match hardware {
        Ok(h) => h,
        Err(e) => return Err(power.fail_boot(e).await),
    };

    // ── Cycle loop ──────────────────────────────────────────────────
    let mut node = match Node::new(&settings, build_link(), bus, pump) {
        Ok(n) => n,
        Err(e) => return Err(power.fail_boot(e).await),
    };
    // On timer power the first end_cycle never returns.
    loop {
        let report = node.cycle_once(&mut power).await;
        info!(?report, "cycle finished");
    }
}

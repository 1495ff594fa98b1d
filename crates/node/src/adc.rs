//! ADS1115 16-bit ADC driver over I2C for the soil sensor and the supply rail.
//!
//! Reads single-ended channels at PGA ±4.096 V, 128 SPS, single-shot mode.
//! This matches the default soil calibration (`raw_dry ≈ 26000`,
//! `raw_wet ≈ 12000`) for typical capacitive sensors powered from 3.3 V.

use rppal::i2c::I2c;
use std::{thread, time::Duration};

use crate::config::{SoilSection, SupplySection};
use crate::sensors::{Quantity, SensorBus};

// ── ADS1115 register addresses ──────────────────────────────────────────────

/// Conversion result register (read-only, 16-bit signed).
const REG_CONVERSION: u8 = 0x00;
/// Configuration register (read/write).
const REG_CONFIG: u8 = 0x01;

// ── Config register bit fields ──────────────────────────────────────────────
//
// Layout (MSB first):
//   [15]    OS       — write 1 to start single-shot conversion
//   [14:12] MUX      — input multiplexer (channel selection)
//   [11:9]  PGA      — programmable gain amplifier
//   [8]     MODE     — 0 = continuous, 1 = single-shot
//   [7:5]   DR       — data rate
//   [4:0]   comparator, disabled

/// OS=1, PGA=001 (±4.096 V), MODE=1, DR=100 (128 SPS), COMP_QUE=11.
const CONFIG_BASE: u16 = 0b1_000_001_1_100_0_0_0_11;

const MUX_SHIFT: u8 = 12;
const MUX_SINGLE_ENDED: [u16; 4] = [0b100, 0b101, 0b110, 0b111];

/// Default I2C address with ADDR tied to GND.
pub const DEFAULT_ADDR: u16 = 0x48;

/// Full-scale voltage for PGA=001.
const FULL_SCALE_V: f64 = 4.096;

/// Conversion time at 128 SPS is ~7.8 ms.
const CONVERSION_WAIT: Duration = Duration::from_millis(9);

/// Bit 15 of the config register: conversion-ready flag when read.
const OS_READY_BIT: u16 = 1 << 15;

fn config_for_channel(channel: usize) -> u16 {
    CONFIG_BASE | (MUX_SINGLE_ENDED[channel] << MUX_SHIFT)
}

/// Convert a single-ended count into the voltage on the supply rail.
fn counts_to_volts(raw: i16, divider: f64) -> f64 {
    f64::from(raw.max(0)) * FULL_SCALE_V / 32767.0 * divider
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// ADS1115 driver backed by `rppal::i2c`, exposing the soil and supply
/// channels as a [`SensorBus`].
pub struct Ads1115 {
    i2c: I2c,
    soil_channel: usize,
    supply_channel: usize,
    divider: f64,
}

impl Ads1115 {
    /// Open I2C bus 1 and address the ADS1115 at `addr`. Channel indices are
    /// range-checked by config validation.
    pub fn new(addr: u16, soil: &SoilSection, supply: &SupplySection) -> anyhow::Result<Self> {
        let mut i2c = I2c::new()?;
        i2c.set_slave_address(addr)?;

        tracing::info!(
            addr = format_args!("0x{addr:02x}"),
            soil_channel = soil.channel,
            supply_channel = supply.channel,
            "ads1115 initialised"
        );

        Ok(Self {
            i2c,
            soil_channel: soil.channel,
            supply_channel: supply.channel,
            divider: supply.divider,
        })
    }

    /// Perform a single-shot read on `channel`, returning the raw 16-bit
    /// signed value (0–32767 for single-ended).
    fn read_channel(&mut self, channel: usize) -> anyhow::Result<i16> {
        let config = config_for_channel(channel);
        self.i2c.block_write(REG_CONFIG, &config.to_be_bytes())?;

        thread::sleep(CONVERSION_WAIT);

        for _ in 0..3 {
            let mut buf = [0u8; 2];
            self.i2c.block_read(REG_CONFIG, &mut buf)?;
            if u16::from_be_bytes(buf) & OS_READY_BIT != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; 2];
        self.i2c.block_read(REG_CONVERSION, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    fn read_or_nan(&mut self, channel: usize, map: impl Fn(i16) -> f64) -> f64 {
        match self.read_channel(channel) {
            Ok(raw) => map(raw),
            Err(e) => {
                tracing::error!(channel, "adc read failed: {e}");
                f64::NAN
            }
        }
    }
}

impl SensorBus for Ads1115 {
    fn read(&mut self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::SoilRaw => {
                let ch = self.soil_channel;
                self.read_or_nan(ch, |raw| f64::from(raw.max(0)))
            }
            Quantity::SupplyVolts => {
                let (ch, divider) = (self.supply_channel, self.divider);
                self.read_or_nan(ch, |raw| counts_to_volts(raw, divider))
            }
            // No driver for the optional sensors on this board.
            _ => f64::NAN,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_register_channel_a0() {
        let cfg = config_for_channel(0);
        assert_eq!(cfg, 0xC383, "A0 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_channel_a1() {
        let cfg = config_for_channel(1);
        assert_eq!(cfg, 0xD383, "A1 config: {cfg:#06x}");
    }

    #[test]
    fn config_register_channel_a3() {
        let cfg = config_for_channel(3);
        assert_eq!(cfg, 0xF383, "A3 config: {cfg:#06x}");
    }

    #[test]
    fn config_base_is_single_shot_128sps() {
        assert_eq!((CONFIG_BASE >> 8) & 1, 1, "MODE should be single-shot");
        assert_eq!((CONFIG_BASE >> 5) & 0b111, 0b100, "DR should be 128 SPS");
        assert_eq!((CONFIG_BASE >> 9) & 0b111, 0b001, "PGA should be ±4.096 V");
    }

    #[test]
    fn full_scale_count_maps_through_divider() {
        let v = counts_to_volts(32767, 2.0);
        assert!((v - 8.192).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn negative_count_clamps_to_zero_volts() {
        assert_eq!(counts_to_volts(-12, 2.0), 0.0);
    }
}

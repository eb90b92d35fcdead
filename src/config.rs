use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::P9813Error;
use crate::frame::Color;

/// Maximum clock frequency supported by the P9813
pub const MAX_CLOCK_FREQUENCY: u32 = 15_000_000;

/// Highest bus and chip-select indices the spidev backend can address
const MAX_BUS: u8 = 6;
const MAX_CHIP_SELECT: u8 = 15;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub spi: SpiConfig,
    pub chain: ChainConfig,
    pub demo: DemoConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpiConfig {
    pub bus: u8,
    pub chip_select: u8,
    pub speed_hz: u32,
    pub mode: u8,
    pub lsb_first: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Number of daisy-chained P9813 chips
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DemoConfig {
    /// Colors to apply, nearest chip first. Empty means random colors.
    pub colors: Vec<Color>,
    /// Keep applying colors until interrupted
    pub repeat: bool,
    pub interval_ms: u64,
    /// Retries of a failed transfer before giving up
    pub retries: u32,
    /// Switch every chip off before exiting
    pub blank_on_exit: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bus: 0,
            chip_select: 0,
            speed_hz: MAX_CLOCK_FREQUENCY,
            mode: 0,
            lsb_first: false,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self { length: 1 }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            colors: vec![],
            repeat: false,
            interval_ms: 1000,
            retries: 2,
            blank_on_exit: false,
        }
    }
}

impl SpiConfig {
    /// spidev path for this bus and chip select, e.g. `/dev/spidev0.0`
    pub fn device_path(&self) -> String {
        format!("/dev/spidev{}.{}", self.bus, self.chip_select)
    }

    /// Check the settings against what the P9813 and the bus accept.
    /// Runs before the device file is touched.
    pub fn validate(&self) -> std::result::Result<(), P9813Error> {
        if self.speed_hz == 0 || self.speed_hz > MAX_CLOCK_FREQUENCY {
            return Err(P9813Error::ConfigurationError(format!(
                "clock speed {} Hz outside 1..={} Hz",
                self.speed_hz, MAX_CLOCK_FREQUENCY
            )));
        }
        if self.mode > 3 {
            return Err(P9813Error::ConfigurationError(format!(
                "SPI mode {} (must be 0-3)",
                self.mode
            )));
        }
        if self.bus > MAX_BUS {
            return Err(P9813Error::ConfigurationError(format!(
                "SPI bus {} (must be 0-{})",
                self.bus, MAX_BUS
            )));
        }
        if self.chip_select > MAX_CHIP_SELECT {
            return Err(P9813Error::ConfigurationError(format!(
                "chip select {} (must be 0-{})",
                self.chip_select, MAX_CHIP_SELECT
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.spi.validate()?;
        if self.chain.length == 0 {
            return Err(anyhow::anyhow!("Chain length must be at least 1"));
        }
        if !self.demo.colors.is_empty() && self.demo.colors.len() != self.chain.length {
            return Err(anyhow::anyhow!(
                "Configured {} colors for a chain of {} chips",
                self.demo.colors.len(),
                self.chain.length
            ));
        }
        Ok(())
    }
}

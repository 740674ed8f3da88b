// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits,
};
use ::std::{
    fs::File,
    io::Read,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Ring engine options.
mod ring_config {
    pub const SECTION_NAME: &str = "ring_engine";
    pub const TX_RING_SIZE: &str = "tx_ring_size";
    pub const RX_RING_SIZE: &str = "rx_ring_size";
    pub const RX_BD_RING_SIZE: &str = "rx_bd_ring_size";
    pub const BUFFER_SIZE: &str = "buffer_size";
    pub const POOL_COUNT: &str = "pool_count";
    pub const POLL_BUDGET: &str = "poll_budget";
    pub const STOP_THRESHOLD: &str = "stop_threshold";
    pub const WAKE_THRESHOLD: &str = "wake_threshold";
    pub const WATCHDOG_TIMEOUT_MS: &str = "watchdog_timeout_ms";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Static configuration for one ring pair and its completion glue.
#[derive(Clone, Debug)]
pub struct RingConfig {
    /// Number of transmit ring slots (one is the permanent sentinel).
    pub tx_ring_size: usize,
    /// Number of receive packet-header ring slots.
    pub rx_ring_size: usize,
    /// Number of receive buffer-descriptor ring slots, `>= rx_ring_size`.
    pub rx_bd_ring_size: usize,
    /// Size of each receive buffer, in bytes.
    pub buffer_size: usize,
    /// Number of blocks in the receive buffer pool.
    pub pool_count: usize,
    /// Maximum packets delivered per poll pass.
    pub poll_budget: usize,
    /// Producer is paused when free transmit slots drop below this.
    pub stop_threshold: usize,
    /// Producer is resumed when free transmit slots reach this; must exceed the stop threshold.
    pub wake_threshold: usize,
    /// Transmit stall tolerance before the watchdog resets the ring.
    pub watchdog_timeout: Duration,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl RingConfig {
    /// Reads a configuration file into a [`RingConfig`], overriding defaults with any keys
    /// present in the `ring_engine` section.
    pub fn from_file(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)
            .map_err(|_| Fail::new(libc::ENOENT, "could not open config file"))?
            .read_to_string(&mut config_s)
            .map_err(|_| Fail::new(libc::EIO, "could not read config file"))?;

        let docs: Vec<Yaml> = YamlLoader::load_from_str(&config_s)
            .map_err(|_| Fail::new(libc::EINVAL, "could not parse config file"))?;
        let document: &Yaml = docs
            .first()
            .ok_or_else(|| Fail::new(libc::EINVAL, "empty config file"))?;

        Self::from_yaml(&document[ring_config::SECTION_NAME])
    }

    /// Builds a [`RingConfig`] from a parsed `ring_engine` section. Missing keys keep their
    /// defaults; present keys must be integers.
    pub fn from_yaml(section: &Yaml) -> Result<Self, Fail> {
        let defaults: Self = Self::default();
        let config: Self = Self {
            tx_ring_size: get_usize(section, ring_config::TX_RING_SIZE, defaults.tx_ring_size)?,
            rx_ring_size: get_usize(section, ring_config::RX_RING_SIZE, defaults.rx_ring_size)?,
            rx_bd_ring_size: get_usize(section, ring_config::RX_BD_RING_SIZE, defaults.rx_bd_ring_size)?,
            buffer_size: get_usize(section, ring_config::BUFFER_SIZE, defaults.buffer_size)?,
            pool_count: get_usize(section, ring_config::POOL_COUNT, defaults.pool_count)?,
            poll_budget: get_usize(section, ring_config::POLL_BUDGET, defaults.poll_budget)?,
            stop_threshold: get_usize(section, ring_config::STOP_THRESHOLD, defaults.stop_threshold)?,
            wake_threshold: get_usize(section, ring_config::WAKE_THRESHOLD, defaults.wake_threshold)?,
            watchdog_timeout: Duration::from_millis(get_usize(
                section,
                ring_config::WATCHDOG_TIMEOUT_MS,
                defaults.watchdog_timeout.as_millis() as usize,
            )? as u64),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for internal consistency.
    pub fn validate(&self) -> Result<(), Fail> {
        if self.tx_ring_size < 2 {
            return Err(Fail::new(libc::EINVAL, "transmit ring needs at least two slots"));
        }
        if self.rx_ring_size < 1 {
            return Err(Fail::new(libc::EINVAL, "receive ring needs at least one slot"));
        }
        if self.rx_bd_ring_size < self.rx_ring_size {
            return Err(Fail::new(
                libc::EINVAL,
                "receive buffer-descriptor ring cannot be shallower than the header ring",
            ));
        }
        if self.buffer_size < limits::ETH_HEADER_SIZE {
            return Err(Fail::new(libc::EINVAL, "receive buffers too small for a frame header"));
        }
        if self.pool_count < self.rx_ring_size {
            return Err(Fail::new(libc::EINVAL, "pool cannot fill the receive ring"));
        }
        if self.poll_budget < 1 {
            return Err(Fail::new(libc::EINVAL, "poll budget cannot be zero"));
        }
        if self.wake_threshold <= self.stop_threshold {
            return Err(Fail::new(
                libc::EINVAL,
                "wake threshold must exceed stop threshold for hysteresis",
            ));
        }
        if self.wake_threshold >= self.tx_ring_size {
            return Err(Fail::new(libc::EINVAL, "wake threshold exceeds ring capacity"));
        }
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            tx_ring_size: 64,
            rx_ring_size: 64,
            rx_bd_ring_size: 64,
            buffer_size: limits::RECVBUF_SIZE_DEFAULT,
            pool_count: 128,
            poll_budget: 32,
            stop_threshold: 4,
            wake_threshold: 8,
            watchdog_timeout: Duration::from_secs(2),
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Reads an integer key from a YAML section, falling back to `default` when the key is absent.
fn get_usize(section: &Yaml, key: &str, default: usize) -> Result<usize, Fail> {
    match &section[key] {
        Yaml::BadValue => Ok(default),
        Yaml::Integer(value) if *value >= 0 => Ok(*value as usize),
        _ => Err(Fail::new(libc::EINVAL, "config key must be a non-negative integer")),
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::RingConfig;
    use crate::ensure_eq;
    use ::anyhow::{
        ensure,
        Result,
    };
    use ::std::time::Duration;
    use ::yaml_rust::YamlLoader;

    #[test]
    fn defaults_are_valid() -> Result<()> {
        let config: RingConfig = RingConfig::default();
        ensure!(config.validate().is_ok());
        Ok(())
    }

    #[test]
    fn validation_rejects_inconsistent_settings() -> Result<()> {
        let base: RingConfig = RingConfig::default();

        let mut config: RingConfig = base.clone();
        config.tx_ring_size = 1;
        ensure!(config.validate().is_err());

        let mut config: RingConfig = base.clone();
        config.rx_bd_ring_size = config.rx_ring_size - 1;
        ensure!(config.validate().is_err());

        let mut config: RingConfig = base.clone();
        config.wake_threshold = config.stop_threshold;
        ensure!(config.validate().is_err());

        let mut config: RingConfig = base.clone();
        config.pool_count = config.rx_ring_size - 1;
        ensure!(config.validate().is_err());

        let mut config: RingConfig = base;
        config.poll_budget = 0;
        ensure!(config.validate().is_err());
        Ok(())
    }

    #[test]
    fn yaml_section_overrides_defaults() -> Result<()> {
        let text: &str = "\
tx_ring_size: 16
rx_ring_size: 8
rx_bd_ring_size: 12
stop_threshold: 2
wake_threshold: 5
watchdog_timeout_ms: 500
";
        let docs = YamlLoader::load_from_str(text)?;
        let config: RingConfig = RingConfig::from_yaml(&docs[0])?;

        ensure_eq!(config.tx_ring_size, 16);
        ensure_eq!(config.rx_ring_size, 8);
        ensure_eq!(config.rx_bd_ring_size, 12);
        ensure_eq!(config.stop_threshold, 2);
        ensure_eq!(config.wake_threshold, 5);
        ensure_eq!(config.watchdog_timeout, Duration::from_millis(500));
        // Untouched keys keep their defaults.
        ensure_eq!(config.poll_budget, RingConfig::default().poll_budget);
        Ok(())
    }

    #[test]
    fn yaml_rejects_non_integer_values() -> Result<()> {
        let docs = YamlLoader::load_from_str("tx_ring_size: lots")?;
        ensure!(RingConfig::from_yaml(&docs[0]).is_err());
        Ok(())
    }
}

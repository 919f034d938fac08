// Chain configuration
//
// Gas constants for the native contracts are a versionable parameter set,
// loaded once at startup and threaded into the precompile registry.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Gas charged by the native contracts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    /// Flat cost of a SEP101 `get`
    pub sep101_get: u64,
    /// Flat part of a SEP101 `set`
    pub sep101_set_base: u64,
    /// Charged per byte of `len(key) + len(value)` on `set`
    pub sep101_set_per_byte: u64,
    /// Flat cost of any staking operation
    pub staking_op: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            sep101_get: 5_000,
            sep101_set_base: 20_000,
            sep101_set_per_byte: 16,
            staking_op: 400_000,
        }
    }
}

impl GasSchedule {
    /// Cost of a `set` with the given payload sizes, saturating on overflow
    pub fn sep101_set(&self, key_len: usize, value_len: usize) -> u64 {
        let bytes = (key_len as u64).saturating_add(value_len as u64);
        self.sep101_set_base
            .saturating_add(self.sep101_set_per_byte.saturating_mul(bytes))
    }
}

/// Node-wide execution parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub block_gas_limit: u64,
    pub gas: GasSchedule,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            block_gas_limit: 30_000_000,
            gas: GasSchedule::default(),
        }
    }
}

impl ChainConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config string. Missing fields take defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::Invalid("chain_id must be non-zero".into()));
        }
        if self.block_gas_limit == 0 {
            return Err(ConfigError::Invalid("block_gas_limit must be non-zero".into()));
        }
        if self.gas.sep101_get == 0 || self.gas.sep101_set_base == 0 || self.gas.staking_op == 0 {
            return Err(ConfigError::Invalid(
                "native contract base gas costs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

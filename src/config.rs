//! Ledger configuration.

use crate::domain::commission::RateSchedule;
use crate::domain::money::AmountRange;
use crate::error::{LedgerError, Result};
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::time::Duration;

const MAX_CURRENCY_SCALE: u32 = 8;

/// Tunables for the money-movement engine.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Inclusive bounds for deposit submissions.
    #[serde(default = "default_deposit_limits")]
    pub deposit_limits: AmountRange,
    /// Inclusive bounds for withdrawal requests.
    #[serde(default = "default_withdrawal_limits")]
    pub withdrawal_limits: AmountRange,
    /// Commission rate per referral level, level 1 first.
    #[serde(default)]
    pub commission_rates: RateSchedule,
    /// Decimal places of the currency's minor unit.
    #[serde(default = "default_currency_scale")]
    pub currency_scale: u32,
    /// Longest wait for a single row lock before the operation fails.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub proof: ProofConfig,
}

/// Limits applied to uploaded proof-of-payment files.
#[derive(Debug, Clone, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_proof_max_bytes")]
    pub max_bytes: usize,
}

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_proof_max_bytes(),
        }
    }
}

fn default_deposit_limits() -> AmountRange {
    AmountRange::from_bounds(dec!(10), dec!(100000))
}

fn default_withdrawal_limits() -> AmountRange {
    AmountRange::from_bounds(dec!(50), dec!(10000))
}

fn default_currency_scale() -> u32 {
    2
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_proof_max_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            deposit_limits: default_deposit_limits(),
            withdrawal_limits: default_withdrawal_limits(),
            commission_rates: RateSchedule::default(),
            currency_scale: default_currency_scale(),
            lock_timeout_ms: default_lock_timeout_ms(),
            proof: ProofConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Loads `config/ledger.toml` (optional) overlaid with `LEDGER__*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/ledger").required(false))
            .add_source(config::Environment::with_prefix("LEDGER").separator("__"))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()
    }

    /// Parses an inline TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;

        let parsed: Self = config.try_deserialize()?;
        parsed.validate()
    }

    pub fn validate(self) -> Result<Self> {
        if self.currency_scale > MAX_CURRENCY_SCALE {
            return Err(LedgerError::Config(format!(
                "currency_scale {} exceeds {MAX_CURRENCY_SCALE}",
                self.currency_scale
            )));
        }
        if self.lock_timeout_ms == 0 {
            return Err(LedgerError::Config(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.proof.max_bytes == 0 {
            return Err(LedgerError::Config(
                "proof.max_bytes must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

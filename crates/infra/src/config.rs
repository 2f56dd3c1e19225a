//! Engine configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Account codes derived postings are booked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingCodes {
    pub receivable: String,
    pub revenue: String,
    pub output_tax: String,
    pub cash: String,
}

impl Default for PostingCodes {
    fn default() -> Self {
        Self {
            receivable: "1200".to_string(),
            revenue: "4000".to_string(),
            output_tax: "2100".to_string(),
            cash: "1000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Reload-and-retry attempts after losing an optimistic concurrency race.
    pub max_conflict_retries: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    pub posting_codes: PostingCodes,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 8,
            log_filter: "info".to_string(),
            posting_codes: PostingCodes::default(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `TALLY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`LedgerConfig::from_env`] but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("TALLY_MAX_CONFLICT_RETRIES") {
            config.max_conflict_retries =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: "TALLY_MAX_CONFLICT_RETRIES",
                        value: raw.clone(),
                        reason: e.to_string(),
                    })?;
        }
        if let Some(filter) = lookup("TALLY_LOG") {
            config.log_filter = filter;
        }

        let codes = &mut config.posting_codes;
        for (key, slot) in [
            ("TALLY_RECEIVABLE_ACCOUNT", &mut codes.receivable),
            ("TALLY_REVENUE_ACCOUNT", &mut codes.revenue),
            ("TALLY_OUTPUT_TAX_ACCOUNT", &mut codes.output_tax),
            ("TALLY_CASH_ACCOUNT", &mut codes.cash),
        ] {
            if let Some(code) = lookup(key) {
                let code = code.trim();
                if code.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key,
                        value: code.to_string(),
                        reason: "account code must not be empty".to_string(),
                    });
                }
                *slot = code.to_string();
            }
        }

        Ok(config)
    }
}

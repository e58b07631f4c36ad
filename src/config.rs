//! # Configuration Module
//!
//! Application settings read from the environment (a `.env` file is loaded
//! first by the binary), including the production policies and the store
//! retry settings.

use std::fmt;
use std::str::FromStr;

use crate::costing::DEFAULT_MARKUP;
use crate::error::{CostingError, Result};

/// Secret used when `ACCESS_SECRET` is not configured
pub const DEFAULT_ACCESS_SECRET: &str = "admin";
pub const DEFAULT_LANGUAGE: &str = "en";

/// What to do when stock does not cover a production plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortfallPolicy {
    /// Refuse to produce
    #[default]
    Block,
    /// Produce anyway and note the shortfall in the history record
    Warn,
}

impl FromStr for ShortfallPolicy {
    type Err = CostingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(ShortfallPolicy::Block),
            "warn" => Ok(ShortfallPolicy::Warn),
            other => Err(CostingError::Config(format!(
                "unknown shortfall policy '{other}' (expected block or warn)"
            ))),
        }
    }
}

impl fmt::Display for ShortfallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortfallPolicy::Block => f.write_str("block"),
            ShortfallPolicy::Warn => f.write_str("warn"),
        }
    }
}

/// Order in which lots sharing an ingredient are drawn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeductionOrder {
    /// Ascending quantity on hand, so small leftovers are used up first
    #[default]
    SmallestFirst,
    /// Oldest lot first
    Insertion,
}

impl FromStr for DeductionOrder {
    type Err = CostingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "smallest-first" | "smallest_first" | "ascending" => Ok(DeductionOrder::SmallestFirst),
            "insertion" | "oldest-first" => Ok(DeductionOrder::Insertion),
            other => Err(CostingError::Config(format!(
                "unknown deduction order '{other}' (expected smallest-first or insertion)"
            ))),
        }
    }
}

impl fmt::Display for DeductionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeductionOrder::SmallestFirst => f.write_str("smallest-first"),
            DeductionOrder::Insertion => f.write_str("insertion"),
        }
    }
}

/// Recovery configuration for store operations
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Base delay between retries in milliseconds
    pub base_retry_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_retry_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_retry_delay_ms: 100,
            max_retry_delay_ms: 2000,
        }
    }
}

/// Policies applied when confirming a production
#[derive(Debug, Clone, Default)]
pub struct ProductionSettings {
    pub shortfall_policy: ShortfallPolicy,
    pub deduction_order: DeductionOrder,
    pub recovery: RecoveryConfig,
}

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Shared password gating every command
    pub access_secret: String,
    /// Language for user-facing messages ("en" or "pt")
    pub language: String,
    /// Suggested sale price = cost × markup
    pub default_markup: f64,
    pub production: ProductionSettings,
}

impl AppConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| CostingError::Config("DATABASE_URL must be set".to_string()))?;

        let access_secret =
            lookup("ACCESS_SECRET").unwrap_or_else(|| DEFAULT_ACCESS_SECRET.to_string());
        let language = lookup("APP_LANGUAGE").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let default_markup = match lookup("DEFAULT_MARKUP") {
            Some(raw) => {
                let markup = parse_number::<f64>("DEFAULT_MARKUP", &raw)?;
                if !markup.is_finite() || markup <= 0.0 {
                    return Err(CostingError::Config(
                        "DEFAULT_MARKUP must be greater than zero".to_string(),
                    ));
                }
                markup
            }
            None => DEFAULT_MARKUP,
        };

        let shortfall_policy = lookup("SHORTFALL_POLICY")
            .map(|raw| raw.parse::<ShortfallPolicy>())
            .transpose()?
            .unwrap_or_default();
        let deduction_order = lookup("DEDUCTION_ORDER")
            .map(|raw| raw.parse::<DeductionOrder>())
            .transpose()?
            .unwrap_or_default();

        let defaults = RecoveryConfig::default();
        let recovery = RecoveryConfig {
            max_retries: optional_number(&lookup, "STORE_MAX_RETRIES", defaults.max_retries)?,
            base_retry_delay_ms: optional_number(
                &lookup,
                "STORE_BASE_RETRY_DELAY_MS",
                defaults.base_retry_delay_ms,
            )?,
            max_retry_delay_ms: optional_number(
                &lookup,
                "STORE_MAX_RETRY_DELAY_MS",
                defaults.max_retry_delay_ms,
            )?,
        };
        if recovery.base_retry_delay_ms > recovery.max_retry_delay_ms {
            return Err(CostingError::Config(
                "STORE_BASE_RETRY_DELAY_MS must not exceed STORE_MAX_RETRY_DELAY_MS".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            access_secret,
            language,
            default_markup,
            production: ProductionSettings {
                shortfall_policy,
                deduction_order,
                recovery,
            },
        })
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| CostingError::Config(format!("{key} has an invalid value '{raw}'")))
}

fn optional_number<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_number(key, &raw),
        None => Ok(default),
    }
}

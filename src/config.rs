use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "USD";
const DEFAULT_RETURN_URL: &str = "https://localhost/checkout/confirmation";
const DEFAULT_SETTLEMENT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SETTLEMENT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_CART_FLUSH_DEBOUNCE_MS: u64 = 250;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

fn validate_currency(currency: &str) -> Result<(), ValidationError> {
    if currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Currency must be a 3-letter ISO code".into());
        Err(err)
    }
}

fn validate_minimum_charge(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Minimum charge must be greater than 0".into());
        Err(err)
    }
}

/// Application configuration for the settlement pipeline.
///
/// The publishable key and backend URL have no defaults and must be supplied
/// via a config file or `CHECKOUT__*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Base URL of the storefront backend API
    #[validate(length(min = 1))]
    pub backend_url: String,

    /// Payment provider publishable key
    #[validate(length(min = 1))]
    pub publishable_key: String,

    /// Currency used for estimation and authorization
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3), custom = "validate_currency")]
    pub currency: String,

    /// Minimum chargeable amount in major units. Estimated totals below this
    /// indicate a calculation bug and are rejected before any authorization.
    #[serde(default = "default_minimum_charge")]
    #[validate(custom = "validate_minimum_charge")]
    pub minimum_charge: Decimal,

    /// Retry budget for settlement, counting the first attempt
    #[serde(default = "default_settlement_max_attempts")]
    pub settlement_max_attempts: u32,

    /// Fixed delay between settlement attempts
    #[serde(default = "default_settlement_base_delay_ms")]
    pub settlement_base_delay_ms: u64,

    /// Debounce window for coalescing cart writes to durable storage
    #[serde(default = "default_cart_flush_debounce_ms")]
    pub cart_flush_debounce_ms: u64,

    /// Capacity of the advisory event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Return URL handed to the provider confirmation call
    #[serde(default = "default_return_url")]
    pub return_url: String,

    /// Promotional free-shipping flag applied to every estimate
    #[serde(default)]
    pub free_shipping: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_minimum_charge() -> Decimal {
    // 50 cents, the floor most card processors accept
    Decimal::new(50, 2)
}

fn default_settlement_max_attempts() -> u32 {
    DEFAULT_SETTLEMENT_MAX_ATTEMPTS
}

fn default_settlement_base_delay_ms() -> u64 {
    DEFAULT_SETTLEMENT_BASE_DELAY_MS
}

fn default_cart_flush_debounce_ms() -> u64 {
    DEFAULT_CART_FLUSH_DEBOUNCE_MS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

fn default_return_url() -> String {
    DEFAULT_RETURN_URL.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8080".to_string(),
            publishable_key: "pk_test_placeholder".to_string(),
            currency: default_currency(),
            minimum_charge: default_minimum_charge(),
            settlement_max_attempts: default_settlement_max_attempts(),
            settlement_base_delay_ms: default_settlement_base_delay_ms(),
            cart_flush_debounce_ms: default_cart_flush_debounce_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            return_url: default_return_url(),
            free_shipping: false,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (CHECKOUT_*)
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("currency", DEFAULT_CURRENCY)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("CHECKOUT").separator("__"))
        .build()?;

    config.try_deserialize()
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_checkout={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

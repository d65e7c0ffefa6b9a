use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_RAZORPAY_BASE_URL: &str = "https://api.razorpay.com";
const DEFAULT_STRIPE_BASE_URL: &str = "https://api.stripe.com";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret used to verify bearer tokens (HS256)
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(custom = "validate_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    // ========== Pricing ==========
    /// Tax applied to (subtotal - discount), as a percentage (18 = 18%)
    #[serde(default = "default_tax_rate_percent")]
    #[validate(custom = "validate_tax_rate_percent")]
    pub tax_rate_percent: Decimal,

    /// Orders with a subtotal strictly above this ship for free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Flat shipping fee charged at or below the free shipping threshold
    #[serde(default = "default_flat_shipping_fee")]
    pub flat_shipping_fee: Decimal,

    /// ISO currency code for carts, orders and payments
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    // ========== Payment providers ==========
    /// Upper bound for any single payment provider call
    #[serde(default = "default_payment_timeout_secs")]
    pub payment_timeout_secs: u64,

    #[serde(default)]
    pub razorpay_key_id: Option<String>,
    #[serde(default)]
    pub razorpay_key_secret: Option<String>,
    /// Secret used to sign Razorpay webhook bodies (distinct from the API key secret)
    #[serde(default)]
    pub razorpay_webhook_secret: Option<String>,
    #[serde(default = "default_razorpay_base_url")]
    pub razorpay_base_url: String,

    #[serde(default)]
    pub stripe_secret_key: Option<String>,
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,
    #[serde(default = "default_stripe_base_url")]
    pub stripe_base_url: String,
    /// Maximum age of a Stripe webhook signature timestamp
    #[serde(default = "default_stripe_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl AppConfig {
    /// Builds a configuration with pricing and provider defaults, useful for tests and tooling.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            tax_rate_percent: default_tax_rate_percent(),
            free_shipping_threshold: default_free_shipping_threshold(),
            flat_shipping_fee: default_flat_shipping_fee(),
            currency: default_currency(),
            payment_timeout_secs: default_payment_timeout_secs(),
            razorpay_key_id: None,
            razorpay_key_secret: None,
            razorpay_webhook_secret: None,
            razorpay_base_url: default_razorpay_base_url(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_base_url: default_stripe_base_url(),
            stripe_webhook_tolerance_secs: default_stripe_webhook_tolerance_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            tax_rate_percent: self.tax_rate_percent,
            free_shipping_threshold: self.free_shipping_threshold,
            flat_shipping_fee: self.flat_shipping_fee,
            currency: self.currency.clone(),
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.razorpay_key_id.is_some() != self.razorpay_key_secret.is_some() {
            let mut err = ValidationError::new("razorpay_credentials_incomplete");
            err.message =
                Some("razorpay_key_id and razorpay_key_secret must be configured together".into());
            errors.add("razorpay_key_secret", err);
        }

        if self.is_production() && self.stripe_secret_key.is_some() && self.stripe_webhook_secret.is_none() {
            let mut err = ValidationError::new("stripe_webhook_secret_required");
            err.message = Some("Set APP__STRIPE_WEBHOOK_SECRET when Stripe is enabled".into());
            errors.add("stripe_webhook_secret", err);
        }

        if self.flat_shipping_fee.is_sign_negative() || self.free_shipping_threshold.is_sign_negative() {
            let mut err = ValidationError::new("shipping_negative");
            err.message = Some("Shipping threshold and fee must not be negative".into());
            errors.add("flat_shipping_fee", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Pricing knobs shared by the cart and checkout services.
#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub tax_rate_percent: Decimal,
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub currency: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tax_rate_percent: default_tax_rate_percent(),
            free_shipping_threshold: default_free_shipping_threshold(),
            flat_shipping_fee: default_flat_shipping_fee(),
            currency: default_currency(),
        }
    }
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    20
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    10
}
fn default_db_idle_timeout_secs() -> u64 {
    300
}
fn default_db_acquire_timeout_secs() -> u64 {
    10
}

fn default_tax_rate_percent() -> Decimal {
    Decimal::from(18)
}

fn default_free_shipping_threshold() -> Decimal {
    Decimal::from(500)
}

fn default_flat_shipping_fee() -> Decimal {
    Decimal::from(99)
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_payment_timeout_secs() -> u64 {
    10
}

fn default_razorpay_base_url() -> String {
    DEFAULT_RAZORPAY_BASE_URL.to_string()
}

fn default_stripe_base_url() -> String {
    DEFAULT_STRIPE_BASE_URL.to_string()
}

fn default_stripe_webhook_tolerance_secs() -> u64 {
    300
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn validate_environment(value: &str) -> Result<(), ValidationError> {
    match value.to_lowercase().as_str() {
        "development" | "test" | "staging" | "production" => Ok(()),
        _ => {
            let mut err = ValidationError::new("environment");
            err.message =
                Some("Must be one of: development, test, staging, production".into());
            Err(err)
        }
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

fn validate_tax_rate_percent(rate: &Decimal) -> Result<(), ValidationError> {
    if rate.is_sign_negative() || *rate > Decimal::from(100) {
        let mut err = ValidationError::new("tax_rate_percent");
        err.message = Some("tax_rate_percent must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("nursery_api={},tower_http=debug", level);
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

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] with the TOML files read from `config_dir`.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://nursery.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?;

    // The bundled secret only exists so `cargo run` works out of the box.
    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(File::from(config_dir.join("default.toml")).required(false))
        .add_source(File::from(config_dir.join(format!("{}.toml", run_env))).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_reasonably_long_and_varied_secret_for_unit_tests_0123456789".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn pricing_defaults_match_storefront_rules() {
        let pricing = base_config().pricing();
        assert_eq!(pricing.tax_rate_percent, dec!(18));
        assert_eq!(pricing.free_shipping_threshold, dec!(500));
        assert_eq!(pricing.flat_shipping_fee, dec!(99));
        assert_eq!(pricing.currency, "INR");
    }

    #[test]
    fn base_config_passes_validation() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn razorpay_credentials_must_be_paired() {
        let mut cfg = base_config();
        cfg.razorpay_key_id = Some("rzp_test_123".into());
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("razorpay_key_secret"));

        cfg.razorpay_key_secret = Some("secret".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn tax_rate_out_of_range_is_rejected() {
        let mut cfg = base_config();
        cfg.tax_rate_percent = dec!(120);
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("tax_rate_percent"));
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let mut cfg = base_config();
        cfg.environment = "qa-box".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_values_layer_over_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
                port = 9191
                tax_rate_percent = "12"
                free_shipping_threshold = "750"
                razorpay_key_id = "rzp_test_file"
                razorpay_key_secret = "rzp_file_secret"
            "#,
        )
        .unwrap();

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.port, 9191);
        assert_eq!(cfg.tax_rate_percent, dec!(12));
        assert_eq!(cfg.free_shipping_threshold, dec!(750));
        assert_eq!(cfg.flat_shipping_fee, dec!(99));
        assert_eq!(cfg.razorpay_key_id.as_deref(), Some("rzp_test_file"));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), "log_level = \"chatty\"\n").unwrap();

        let result = load_config_from(dir.path());
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }
}

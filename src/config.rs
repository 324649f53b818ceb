use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CARRIER_BASE_URL: &str = "https://api-test.envia.com";
const DEFAULT_CARRIER_TIMEOUT_SECS: u64 = 15;
const DEFAULT_QUOTE_TTL_SECS: u64 = 24 * 60 * 60;

/// Sender address used as the origin of every carrier quote and guide
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct OriginAddress {
    #[validate(length(min = 1))]
    pub name: String,
    pub company: Option<String>,
    pub phone: String,
    pub email: String,
    #[validate(length(min = 1))]
    pub street: String,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: String,
    #[validate(length(min = 1))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
}

impl Default for OriginAddress {
    fn default() -> Self {
        Self {
            name: "Almacén".to_string(),
            company: None,
            phone: "0000000000".to_string(),
            email: "envios@example.com".to_string(),
            street: "Av. Principal 100".to_string(),
            city: "Monterrey".to_string(),
            state: "NL".to_string(),
            postal_code: "64000".to_string(),
            country: "MX".to_string(),
        }
    }
}

/// Box dimensions used when an order does not carry its own parcel data
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct ParcelDefaults {
    #[validate(range(min = 1.0))]
    pub length_cm: f64,
    #[validate(range(min = 1.0))]
    pub width_cm: f64,
    #[validate(range(min = 1.0))]
    pub height_cm: f64,
    /// Floor applied to the summed item weight
    #[validate(range(min = 0.1))]
    pub min_weight_kg: f64,
}

impl Default for ParcelDefaults {
    fn default() -> Self {
        Self {
            length_cm: 30.0,
            width_cm: 20.0,
            height_cm: 15.0,
            min_weight_kg: 1.0,
        }
    }
}

/// Shipping carrier integration settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default)]
pub struct CarrierConfig {
    /// Base URL of the carrier REST API
    #[validate(length(min = 1))]
    pub base_url: String,

    /// Bearer token for the carrier API
    pub api_key: Option<String>,

    /// Hard timeout for every carrier call
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// How long a rate quote (`idRate`) stays bookable
    #[validate(range(min = 60))]
    pub quote_ttl_secs: u64,

    /// Shared secret for webhook HMAC verification; unset disables the check
    pub webhook_secret: Option<String>,

    /// Accepted clock skew for signed webhooks
    pub webhook_tolerance_secs: u64,

    /// Number of consecutive failures before the carrier circuit opens
    #[validate(range(min = 1))]
    pub circuit_breaker_failure_threshold: u32,

    /// Seconds the circuit stays open before probing again
    pub circuit_breaker_timeout_secs: u64,

    #[validate]
    pub origin: OriginAddress,

    #[validate]
    pub parcel: ParcelDefaults,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CARRIER_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_CARRIER_TIMEOUT_SECS,
            quote_ttl_secs: DEFAULT_QUOTE_TTL_SECS,
            webhook_secret: None,
            webhook_tolerance_secs: 300,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_timeout_secs: 60,
            origin: OriginAddress::default(),
            parcel: ParcelDefaults::default(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
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

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

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

    /// Default currency code for prices and carrier quotes
    #[serde(default = "default_currency")]
    #[validate(length(min = 3, max = 3))]
    pub default_currency: String,

    /// Maximum page size for list endpoints
    #[serde(default = "default_api_max_page_size")]
    pub api_max_page_size: u64,

    /// Carrier integration
    #[serde(default)]
    #[validate]
    pub carrier: CarrierConfig,
}

impl AppConfig {
    /// Creates a new configuration
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            default_currency: default_currency(),
            api_max_page_size: default_api_max_page_size(),
            carrier: CarrierConfig::default(),
        }
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    fn validate_additional_constraints(&self) -> Result<(), validator::ValidationErrors> {
        let mut errors = validator::ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.carrier.webhook_secret.is_none() {
            let mut err = ValidationError::new("carrier_webhook_secret_required");
            err.message = Some(
                "Set APP__CARRIER__WEBHOOK_SECRET outside development so carrier callbacks can be authenticated".into(),
            );
            errors.add("carrier", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    "MXN".to_string()
}

fn default_api_max_page_size() -> u64 {
    100
}

/// Validates log level values
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

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

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

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn defaults_pass_field_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn non_dev_requires_cors_origins_and_webhook_secret() {
        let cfg = base_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("cors_allowed_origins"));
        assert!(fields.contains_key("carrier"));
    }

    #[test]
    fn non_dev_with_origins_and_secret_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://tienda.example.com".into());
        cfg.carrier.webhook_secret = Some("whsec_test".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_defaults() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut cfg = base_config();
        cfg.log_level = "verbose".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_carrier_timeout() {
        let mut cfg = base_config();
        cfg.carrier.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "INR";
const DEFAULT_PENDING_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

/// Razorpay credentials; `key_id` is publishable, `key_secret` never leaves the server.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct RazorpayConfig {
    #[validate(length(min = 1))]
    pub key_id: String,
    #[validate(length(min = 1))]
    pub key_secret: String,
    #[serde(default = "default_razorpay_base_url")]
    pub base_url: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PhonepeConfig {
    #[validate(length(min = 1))]
    pub merchant_id: String,
    #[validate(length(min = 1))]
    pub salt_key: String,
    #[serde(default = "default_salt_index")]
    pub salt_index: String,
    #[serde(default = "default_phonepe_base_url")]
    pub base_url: String,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CashfreeConfig {
    #[validate(length(min = 1))]
    pub client_id: String,
    #[validate(length(min = 1))]
    pub client_secret: String,
    #[serde(default = "default_cashfree_base_url")]
    pub base_url: String,
}

/// Per-gateway credential blocks. A gateway with no block is simply not
/// offered; requests for it fail as a configuration error before any
/// network or database activity.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GatewaysConfig {
    pub razorpay: Option<RazorpayConfig>,
    pub phonepe: Option<PhonepeConfig>,
    pub cashfree: Option<CashfreeConfig>,
}

/// Stale-order reaper tuning
#[derive(Clone, Debug, Deserialize)]
pub struct ReaperConfig {
    /// Age after which an unpaid online order is cancelled
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,

    /// Sweep cadence
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,

    /// Disable the background worker (sweeps still run via the admin endpoint)
    #[serde(default)]
    pub disabled: bool,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout_secs(),
            interval_secs: default_reaper_interval_secs(),
            disabled: false,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (`development`, `production`, ...)
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Default currency for orders
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Storefront base URL; payment result redirects land on its
    /// /payment-success, /payment-failed, /payment-pending and
    /// /payment-error routes
    #[validate(url)]
    pub frontend_base_url: String,

    /// Externally reachable base URL of this API, used when handing
    /// callback URLs to gateways
    #[validate(url)]
    pub api_base_url: String,

    /// Shared secret for admin and cron endpoints, sent as `X-Admin-Token`
    #[validate(length(min = 16))]
    pub admin_api_token: String,

    /// Comma-separated allowed CORS origins; unset means permissive in
    /// development only
    pub cors_allowed_origins: Option<String>,

    /// Gateway credentials
    #[serde(default)]
    pub gateways: GatewaysConfig,

    /// Reaper tuning
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn pending_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper.pending_timeout_secs)
    }

    /// Gateway environment tag surfaced to clients (e.g. the Cashfree SDK
    /// needs to know which mode to boot in)
    pub fn gateway_environment(&self) -> &'static str {
        if self.is_production() {
            "production"
        } else {
            "sandbox"
        }
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

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_pending_timeout_secs() -> u64 {
    DEFAULT_PENDING_TIMEOUT_SECS
}

fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}

fn default_salt_index() -> String {
    "1".to_string()
}

fn default_razorpay_base_url() -> String {
    "https://api.razorpay.com".to_string()
}

fn default_phonepe_base_url() -> String {
    "https://api-preprod.phonepe.com/apis/pg-sandbox".to_string()
}

fn default_cashfree_base_url() -> String {
    "https://sandbox.cashfree.com/pg".to_string()
}

/// Initializes the tracing subscriber. Honors RUST_LOG when set, otherwise
/// derives a filter from the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("milletmart_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Loads configuration from config files and environment variables.
///
/// Profile selection follows RUN_ENV (or APP_ENV); `APP__`-prefixed
/// environment variables override file values, with `__` separating
/// nesting levels (e.g. APP__GATEWAYS__RAZORPAY__KEY_SECRET).
pub fn load_config() -> Result<AppConfig, AppConfigError> {
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

    let builder = Config::builder()
        .set_default("database_url", "sqlite://milletmart.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("currency", DEFAULT_CURRENCY)?
        .set_default("frontend_base_url", "http://localhost:5173")?
        .set_default("api_base_url", "http://localhost:8080")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"));

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize()?;
    app_config.validate()?;

    if app_config.is_production() && app_config.gateways.razorpay.is_none()
        && app_config.gateways.phonepe.is_none()
        && app_config.gateways.cashfree.is_none()
    {
        info!("No payment gateway configured; only cash-on-delivery checkout will be available");
    }

    Ok(app_config)
}

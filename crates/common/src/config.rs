//! Client configuration types.

use serde::{Deserialize, Serialize};

use crate::types::{Field, Position};

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Primary API (auth refresh, farm advisory).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Geospatial/weather provider.
    #[serde(default = "default_geo_base_url")]
    pub geo_base_url: String,

    /// Static API key for the geospatial provider.
    #[serde(default)]
    pub geo_api_key: String,

    /// Header carrying `geo_api_key`.
    #[serde(default = "default_geo_api_key_header")]
    pub geo_api_key_header: String,

    /// Where the bearer credential is persisted between runs.
    #[serde(default = "default_session_path")]
    pub session_path: String,

    /// Renewal cookie (`name=value`) seeded into the credentialed client.
    #[serde(default)]
    pub refresh_cookie: String,

    /// Fields to reconcile.
    #[serde(default)]
    pub fields: Vec<FieldConfig>,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub forecast: ForecastConfig,

    #[serde(default)]
    pub advisory: AdvisoryConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// One configured field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub id: String,
    /// `[lng, lat]` pairs; the ring is closed automatically.
    #[serde(default)]
    pub boundary: Vec<Position>,
}

impl From<&FieldConfig> for Field {
    fn from(cfg: &FieldConfig) -> Self {
        Field::new(cfg.id.clone(), cfg.boundary.clone())
    }
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request budget shared by all endpoints.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

/// Forecast cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Freshness window for cached forecasts.
    #[serde(default = "default_forecast_ttl_secs")]
    pub ttl_secs: u64,
}

/// Advisory polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

/// AOI reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay after a creation call settles before its in-progress marker clears.
    #[serde(default = "default_in_progress_clear_ms")]
    pub in_progress_clear_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────

fn default_api_base_url() -> String {
    "http://localhost:8000/api".into()
}
fn default_geo_base_url() -> String {
    "https://api.agromonitoring.com/agro/1.0".into()
}
fn default_geo_api_key_header() -> String {
    "x-api-key".into()
}
fn default_session_path() -> String {
    ".field-sync/session.json".into()
}

fn default_timeout_secs() -> u64 {
    15
}
fn default_requests_per_second() -> u32 {
    10
}

fn default_forecast_ttl_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_poll_max_attempts() -> u32 {
    12
}

fn default_in_progress_clear_ms() -> u64 {
    1000
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_forecast_ttl_secs(),
        }
    }
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            in_progress_clear_ms: default_in_progress_clear_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            geo_base_url: default_geo_base_url(),
            geo_api_key: String::new(),
            geo_api_key_header: default_geo_api_key_header(),
            session_path: default_session_path(),
            refresh_cookie: String::new(),
            fields: Vec::new(),
            http: HttpConfig::default(),
            forecast: ForecastConfig::default(),
            advisory: AdvisoryConfig::default(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

//! Configuration loader: .env, then config.toml, then `FIELD_SYNC_*` variables.

use std::path::Path;

use common::config::AppConfig;
use common::Error;

const ENV_PREFIX: &str = "FIELD_SYNC_";

fn parse_positive<T>(raw: &str, env_name: &str) -> Result<T, Error>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let parsed = raw
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= T::default() {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn validate_config(config: &AppConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.api_base_url.trim().is_empty() {
        issues.push("api_base_url must not be empty".into());
    }
    if config.geo_base_url.trim().is_empty() {
        issues.push("geo_base_url must not be empty".into());
    }
    if config.geo_api_key.trim().is_empty() {
        issues.push("geo_api_key is required (FIELD_SYNC_GEO_API_KEY or config.toml)".into());
    }
    if config.geo_api_key_header.trim().is_empty() {
        issues.push("geo_api_key_header must not be empty".into());
    }
    if config.session_path.trim().is_empty() {
        issues.push("session_path must not be empty".into());
    }

    if config.fields.is_empty() {
        issues.push("fields must contain at least one field".into());
    }
    let mut seen = std::collections::HashSet::new();
    for field in &config.fields {
        if field.id.trim().is_empty() {
            issues.push("fields[].id must not be empty".into());
        } else if !seen.insert(field.id.as_str()) {
            issues.push(format!("field id {} is configured more than once", field.id));
        }
    }

    if config.http.timeout_secs == 0 {
        issues.push("http.timeout_secs must be > 0".into());
    }
    if config.http.requests_per_second == 0 {
        issues.push("http.requests_per_second must be > 0".into());
    }
    if config.forecast.ttl_secs == 0 {
        issues.push("forecast.ttl_secs must be > 0".into());
    }
    if config.advisory.poll_interval_ms == 0 {
        issues.push("advisory.poll_interval_ms must be > 0".into());
    }
    if config.advisory.max_attempts == 0 {
        issues.push("advisory.max_attempts must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply `FIELD_SYNC_*` overrides read through `lookup`.
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(url) = var("API_BASE_URL") {
        config.api_base_url = url;
    }
    if let Some(url) = var("GEO_BASE_URL") {
        config.geo_base_url = url;
    }
    if let Some(key) = var("GEO_API_KEY") {
        config.geo_api_key = key;
    }
    if let Some(header) = var("GEO_API_KEY_HEADER") {
        config.geo_api_key_header = header;
    }
    if let Some(path) = var("SESSION_PATH") {
        config.session_path = path;
    }
    if let Some(cookie) = var("REFRESH_COOKIE") {
        config.refresh_cookie = cookie;
    }
    if let Some(raw) = var("HTTP_TIMEOUT_SECS") {
        config.http.timeout_secs = parse_positive(&raw, "FIELD_SYNC_HTTP_TIMEOUT_SECS")?;
    }
    if let Some(raw) = var("REQUESTS_PER_SECOND") {
        config.http.requests_per_second = parse_positive(&raw, "FIELD_SYNC_REQUESTS_PER_SECOND")?;
    }
    if let Some(raw) = var("FORECAST_TTL_SECS") {
        config.forecast.ttl_secs = parse_positive(&raw, "FIELD_SYNC_FORECAST_TTL_SECS")?;
    }
    if let Some(raw) = var("POLL_INTERVAL_MS") {
        config.advisory.poll_interval_ms = parse_positive(&raw, "FIELD_SYNC_POLL_INTERVAL_MS")?;
    }
    if let Some(raw) = var("POLL_MAX_ATTEMPTS") {
        config.advisory.max_attempts = parse_positive(&raw, "FIELD_SYNC_POLL_MAX_ATTEMPTS")?;
    }
    if let Some(raw) = var("IN_PROGRESS_CLEAR_MS") {
        config.reconcile.in_progress_clear_ms =
            parse_non_negative_u64(&raw, "FIELD_SYNC_IN_PROGRESS_CLEAR_MS")?;
    }
    Ok(())
}

fn read_config_file(path: &Path) -> common::Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration from the environment and an optional config.toml.
pub fn load_config() -> common::Result<AppConfig> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    let mut config = read_config_file(Path::new("config.toml"))?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

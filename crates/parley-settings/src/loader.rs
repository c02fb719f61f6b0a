//! Settings loading: file layer + environment overrides.

use std::path::Path;

use crate::errors::Result;
use crate::types::ParleySettings;

/// Load settings from an optional file path plus `PARLEY_*` env overrides.
///
/// A missing file is not an error — defaults are used. A present-but-invalid
/// file is an error so misconfiguration does not silently fall back.
pub fn load_settings(path: Option<&Path>) -> Result<ParleySettings> {
    let mut settings = match path {
        Some(p) if p.exists() => load_settings_from_path(p)?,
        _ => ParleySettings::default(),
    };
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Load settings from a specific JSON file (no env layer, no validation).
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let raw = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&raw)?;
    Ok(settings)
}

/// Apply `PARLEY_*` environment variable overrides in place.
///
/// Unparseable numeric values are ignored with a warning rather than
/// aborting startup.
fn apply_env_overrides(settings: &mut ParleySettings) {
    if let Ok(host) = std::env::var("PARLEY_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = parse_env("PARLEY_PORT") {
        settings.server.port = port;
    }
    if let Ok(url) = std::env::var("PARLEY_BACKEND_URL") {
        settings.backend.base_url = url;
    }
    if let Ok(key) = std::env::var("PARLEY_BACKEND_API_KEY") {
        settings.backend.api_key = Some(key);
    }
    if let Some(secs) = parse_env("PARLEY_IDLE_TIMEOUT_SECS") {
        settings.session.idle_timeout_secs = secs;
    }
    if let Some(secs) = parse_env("PARLEY_SWEEP_INTERVAL_SECS") {
        settings.session.sweep_interval_secs = secs;
    }
    if let Ok(level) = std::env::var("PARLEY_LOG") {
        settings.logging.level = level;
    }
}

/// Read and parse an env var, warning on parse failure.
fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

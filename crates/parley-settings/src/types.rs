//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON wire
//! format. Each type implements [`Default`] with production default values.
//! `#[serde(default)]` allows partial JSON — missing fields get their
//! default value during deserialization.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default idle timeout before an inactive session is torn down.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30 * 60;

/// Default interval for the backstop expiration sweep.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;

/// Root settings type for the Parley gateway.
///
/// Loaded from an optional JSON file with defaults applied for missing
/// fields; `PARLEY_*` environment variables override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Server network settings.
    pub server: ServerSettings,
    /// Conversation backend settings.
    pub backend: BackendSettings,
    /// Session lifecycle settings.
    pub session: SessionSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            backend: BackendSettings::default(),
            session: SessionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ParleySettings {
    /// Correct invalid values in place.
    ///
    /// Zero timing values are replaced with defaults (with a warning) rather
    /// than rejected, so a bad settings file degrades to working behavior
    /// instead of a confusing startup error.
    pub fn validate(&mut self) {
        if self.session.idle_timeout_secs == 0 {
            tracing::warn!(
                "idleTimeoutSecs must be positive, using default ({DEFAULT_IDLE_TIMEOUT_SECS})"
            );
            self.session.idle_timeout_secs = DEFAULT_IDLE_TIMEOUT_SECS;
        }
        if self.session.sweep_interval_secs == 0 {
            tracing::warn!(
                "sweepIntervalSecs must be positive, using default ({DEFAULT_SWEEP_INTERVAL_SECS})"
            );
            self.session.sweep_interval_secs = DEFAULT_SWEEP_INTERVAL_SECS;
        }
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Conversation backend settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendSettings {
    /// Base URL of the conversation backend.
    pub base_url: String,
    /// Optional bearer token for the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8091".to_string(),
            api_key: None,
        }
    }
}

/// Session lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Seconds of inactivity before a session is torn down.
    pub idle_timeout_secs: u64,
    /// Seconds between backstop expiration sweeps.
    pub sweep_interval_secs: u64,
}

impl SessionSettings {
    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default tracing filter directive (overridable via `RUST_LOG`).
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

//! # parley-settings
//!
//! Configuration management with layered sources for the Parley gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ParleySettings::default()`]
//! 2. **Settings file** — optional JSON file (merged over defaults)
//! 3. **Environment variables** — `PARLEY_*` overrides (highest priority)
//!
//! The session timing values (idle timeout 30 minutes, sweep interval
//! 15 minutes) are configuration, not protocol constants, but default to
//! those values for client compatibility.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path};
pub use types::*;

//! # chorus-settings
//!
//! Configuration management with layered sources for the Chorus relay.
//!
//! [`load_settings`] starts from [`ChorusSettings::default()`], merges
//! `~/.chorus/settings.json` over it, applies `CHORUS_*` environment
//! variables, and validates the result. See [`loader`] for the merge rules.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

//! # parley-settings
//!
//! Configuration for the relay, loaded in layers (lowest priority first):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.parley/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `PARLEY_*` (and `PORT`) overrides
//!
//! The binary applies CLI flags on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

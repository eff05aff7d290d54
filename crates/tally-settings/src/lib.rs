//! # tally-settings
//!
//! Configuration for the Tally client, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`TallySettings::default()`]
//! 2. **User file**: `~/.tally/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TALLY_*` overrides (highest priority)
//!
//! Unlike a global, the loaded [`TallySettings`] value is handed to whoever
//! composes the application, so tests can build their own.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{data_dir, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

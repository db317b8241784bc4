//! # pairline-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PairlineSettings::default()`]
//! 2. **User file**: `~/.pairline/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `PORT` and `PAIRLINE_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, validate};
pub use types::*;

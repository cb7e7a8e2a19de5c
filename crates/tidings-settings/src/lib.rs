//! # tidings-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TidingsSettings::default()`]
//! 2. **Settings file**: `~/.tidings/settings.json`, or the path named by
//!    `TIDINGS_SETTINGS` (deep-merged over defaults)
//! 3. **Environment variables**: `TIDINGS_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to whichever component needs it;
//! there is no process-wide cache.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

//! # gattbench-settings
//!
//! Configuration for the gattbench harness, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`GattbenchSettings::default()`]
//! 2. **User file**: `~/.gattbench/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `GATTBENCH_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! let settings = gattbench_settings::load_settings().unwrap_or_default();
//! println!("log level: {}", settings.logging.level);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

//! # swarm-settings
//!
//! Configuration for the swarm coordinator, client and logging.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SwarmSettings::default()`]
//! 2. **User file**: `$SWARM_HOME/settings.json` (default `~/.swarm`), deep-merged over defaults
//! 3. **Environment variables**: `SWARM_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

//! # dtx configuration
//!
//! Layered settings for the coordinator binary and embedders.
//!
//! Layers, lowest priority first:
//!
//! 1. [`Settings::default`]
//! 2. A TOML file ([`TomlFileSource`], missing file = empty)
//! 3. `DTX_`-prefixed environment variables ([`EnvSource`]), `__` separating sections
//!
//! ```text
//! DTX_DATABASE__URL=sqlite://dtx.db?mode=rwc
//! DTX_FLUSH__MAX_BATCH=30
//! DTX_COORDINATOR__UPDATE_BRANCH_SYNC=true
//! ```

pub mod settings;
pub mod sources;

pub use settings::{
	CoordinatorSettings, DatabaseSettings, ENV_PREFIX, FlushSettings, LogSettings, MAX_FLUSH_BATCH,
	RecoverySettings, Settings, SettingsBuilder, SettingsError,
};
pub use sources::{ConfigSource, EnvSource, SourceError, TomlFileSource};

//! Typed coordinator settings
//!
//! [`Settings::default`] is the lowest layer; sources added to a [`SettingsBuilder`]
//! are deep-merged over it in ascending priority before deserialization.

use crate::sources::{ConfigSource, EnvSource, SourceError, TomlFileSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Prefix of every environment variable read by [`Settings::load`]
pub const ENV_PREFIX: &str = "DTX_";

/// Largest accepted `flush.max_batch`; one batch is one SQL statement
pub const MAX_FLUSH_BATCH: usize = 1000;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
	#[error("Source error: {0}")]
	Source(#[from] SourceError),

	#[error("Invalid settings structure: {0}")]
	Deserialize(#[from] serde_json::Error),

	#[error("Invalid setting {field}: {reason}")]
	Invalid { field: &'static str, reason: String },
}

impl SettingsError {
	fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
		SettingsError::Invalid {
			field,
			reason: reason.into(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
	pub url: String,
	pub max_connections: u32,
	pub acquire_timeout_secs: u64,
}

impl Default for DatabaseSettings {
	fn default() -> Self {
		Self {
			url: "sqlite://dtx.db?mode=rwc".to_string(),
			max_connections: 10,
			acquire_timeout_secs: 30,
		}
	}
}

impl DatabaseSettings {
	pub fn acquire_timeout(&self) -> Duration {
		Duration::from_secs(self.acquire_timeout_secs)
	}
}

/// Branch status flusher tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushSettings {
	/// Bounded queue capacity; producers wait when it is full
	pub queue_capacity: usize,
	/// Batch collection window
	pub interval_ms: u64,
	/// Poll slice inside the window
	pub poll_interval_ms: u64,
	pub max_batch: usize,
	/// Pause before retrying a failed batch commit
	pub retry_backoff_ms: u64,
}

impl Default for FlushSettings {
	fn default() -> Self {
		Self {
			queue_capacity: 1000,
			interval_ms: 200,
			poll_interval_ms: 20,
			max_batch: 20,
			retry_backoff_ms: 1000,
		}
	}
}

impl FlushSettings {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn retry_backoff(&self) -> Duration {
		Duration::from_millis(self.retry_backoff_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
	/// Write branch transitions through the conditional update instead of the flusher
	pub update_branch_sync: bool,
	/// Run the first processing pass before `submit_new` returns
	pub wait_result: bool,
	pub request_timeout_ms: u64,
}

impl Default for CoordinatorSettings {
	fn default() -> Self {
		Self {
			update_branch_sync: false,
			wait_result: false,
			request_timeout_ms: 3000,
		}
	}
}

impl CoordinatorSettings {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
	/// Staleness threshold and poll period
	pub retry_interval_secs: u64,
	pub batch_limit: usize,
}

impl Default for RecoverySettings {
	fn default() -> Self {
		Self {
			retry_interval_secs: 10,
			batch_limit: 100,
		}
	}
}

impl RecoverySettings {
	pub fn retry_interval(&self) -> Duration {
		Duration::from_secs(self.retry_interval_secs)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
	/// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
	pub filter: String,
}

impl Default for LogSettings {
	fn default() -> Self {
		Self {
			filter: "info".to_string(),
		}
	}
}

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	pub database: DatabaseSettings,
	pub flush: FlushSettings,
	pub coordinator: CoordinatorSettings,
	pub recovery: RecoverySettings,
	pub log: LogSettings,
}

impl Settings {
	/// Defaults, then `path` (if given and present), then `DTX_*` environment variables
	///
	/// # Examples
	///
	/// ```no_run
	/// use dtx_conf::Settings;
	///
	/// let settings = Settings::load(Some("dtx.toml".as_ref())).unwrap();
	/// println!("{}", settings.database.url);
	/// ```
	pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
		let mut builder = SettingsBuilder::new();
		if let Some(path) = path {
			builder = builder.add_source(TomlFileSource::new(path));
		}
		builder
			.add_source(EnvSource::new().with_prefix(ENV_PREFIX))
			.build()
	}

	/// Reject combinations the flusher and poller cannot run with
	pub fn validate(&self) -> Result<(), SettingsError> {
		if self.flush.queue_capacity == 0 {
			return Err(SettingsError::invalid("flush.queue_capacity", "must be > 0"));
		}
		if self.flush.max_batch == 0 || self.flush.max_batch > MAX_FLUSH_BATCH {
			return Err(SettingsError::invalid(
				"flush.max_batch",
				format!("must be between 1 and {MAX_FLUSH_BATCH}"),
			));
		}
		if self.flush.poll_interval_ms == 0 || self.flush.poll_interval_ms >= self.flush.interval_ms
		{
			return Err(SettingsError::invalid(
				"flush.poll_interval_ms",
				format!(
					"must be non-zero and shorter than flush.interval_ms ({})",
					self.flush.interval_ms
				),
			));
		}
		if self.database.max_connections == 0 {
			return Err(SettingsError::invalid("database.max_connections", "must be > 0"));
		}
		if self.recovery.retry_interval_secs == 0 {
			return Err(SettingsError::invalid(
				"recovery.retry_interval_secs",
				"must be > 0",
			));
		}
		if self.recovery.batch_limit == 0 {
			return Err(SettingsError::invalid("recovery.batch_limit", "must be > 0"));
		}
		Ok(())
	}
}

/// Merges sources over the defaults
#[derive(Default)]
pub struct SettingsBuilder {
	sources: Vec<Box<dyn ConfigSource>>,
}

impl SettingsBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_source<S: ConfigSource + 'static>(mut self, source: S) -> Self {
		self.sources.push(Box::new(source));
		self
	}

	/// Descriptions of the registered sources, lowest priority first
	pub fn describe(&self) -> Vec<String> {
		let mut sources: Vec<_> = self.sources.iter().collect();
		sources.sort_by_key(|s| s.priority());
		sources.iter().map(|s| s.description()).collect()
	}

	/// Merge every source and deserialize, then validate
	pub fn build(mut self) -> Result<Settings, SettingsError> {
		self.sources.sort_by_key(|s| s.priority());

		let mut merged = serde_json::to_value(Settings::default())?;
		for source in &self.sources {
			for (key, value) in source.load()? {
				if let Value::Object(root) = &mut merged {
					match root.get_mut(&key) {
						Some(existing) => deep_merge(existing, value),
						None => {
							root.insert(key, value);
						}
					}
				}
			}
		}

		let settings: Settings = serde_json::from_value(merged)?;
		settings.validate()?;
		Ok(settings)
	}
}

fn deep_merge(base: &mut Value, overlay: Value) {
	match (base, overlay) {
		(Value::Object(base), Value::Object(overlay)) => {
			for (key, value) in overlay {
				match base.get_mut(&key) {
					Some(existing) => deep_merge(existing, value),
					None => {
						base.insert(key, value);
					}
				}
			}
		}
		(base, overlay) => *base = overlay,
	}
}

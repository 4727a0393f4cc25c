//! Configuration sources for layered settings
//!
//! Each source yields a map of top-level keys to JSON values. Sources are merged in
//! priority order (environment variables > TOML file > defaults).

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

/// Trait for configuration sources
pub trait ConfigSource: Send + Sync {
	/// Load configuration from this source
	fn load(&self) -> Result<IndexMap<String, Value>, SourceError>;

	/// Get the priority of this source (higher = more important)
	fn priority(&self) -> u8;

	/// Get a description of this source
	fn description(&self) -> String;
}

/// Error type for configuration sources
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Parse error: {0}")]
	Parse(String),

	#[error("TOML error: {0}")]
	Toml(#[from] toml::de::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Environment variable configuration source
///
/// Keys are lowercased after the prefix is stripped; the separator splits a key into a
/// section path, so `DTX_FLUSH__MAX_BATCH=30` becomes `{"flush": {"max_batch": 30}}`.
pub struct EnvSource {
	prefix: Option<String>,
	separator: String,
}

impl EnvSource {
	/// Create a source reading every environment variable
	///
	/// # Examples
	///
	/// ```
	/// use dtx_conf::EnvSource;
	///
	/// let source = EnvSource::new().with_prefix("DTX_");
	/// ```
	pub fn new() -> Self {
		Self {
			prefix: None,
			separator: "__".to_string(),
		}
	}

	/// Only read variables starting with `prefix`
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = Some(prefix.into());
		self
	}

	/// Section separator inside a key (default `__`)
	pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
		self.separator = separator.into();
		self
	}

	fn load_from<I>(&self, vars: I) -> IndexMap<String, Value>
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let mut config = IndexMap::new();

		for (key, value) in vars {
			let clean_key = match &self.prefix {
				Some(prefix) => match key.strip_prefix(prefix.as_str()) {
					Some(rest) => rest.to_lowercase(),
					None => continue,
				},
				None => key.to_lowercase(),
			};

			let mut path = clean_key.split(self.separator.as_str());
			let Some(head) = path.next().filter(|h| !h.is_empty()) else {
				continue;
			};
			let rest: Vec<&str> = path.collect();
			let parsed = parse_env_value(value);

			if rest.is_empty() {
				config.insert(head.to_string(), parsed);
				continue;
			}

			let entry = config
				.entry(head.to_string())
				.or_insert_with(|| Value::Object(Map::new()));
			insert_path(entry, &rest, parsed);
		}

		config
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

fn parse_env_value(value: String) -> Value {
	match value.trim().to_lowercase().as_str() {
		"true" | "yes" | "on" => return Value::Bool(true),
		"false" | "no" | "off" => return Value::Bool(false),
		_ => {}
	}
	if let Ok(num) = value.parse::<i64>() {
		Value::Number(num.into())
	} else {
		Value::String(value)
	}
}

fn insert_path(target: &mut Value, path: &[&str], value: Value) {
	let Some((last, parents)) = path.split_last() else {
		return;
	};
	if !target.is_object() {
		*target = Value::Object(Map::new());
	}
	let mut cursor = target;
	for segment in parents {
		let Value::Object(map) = cursor else {
			return;
		};
		let next = map
			.entry(segment.to_string())
			.or_insert_with(|| Value::Object(Map::new()));
		if !next.is_object() {
			*next = Value::Object(Map::new());
		}
		cursor = next;
	}
	if let Value::Object(map) = cursor {
		map.insert(last.to_string(), value);
	}
}

impl ConfigSource for EnvSource {
	fn load(&self) -> Result<IndexMap<String, Value>, SourceError> {
		Ok(self.load_from(std::env::vars()))
	}

	fn priority(&self) -> u8 {
		100
	}

	fn description(&self) -> String {
		match &self.prefix {
			Some(prefix) => format!("Environment variables (prefix: {})", prefix),
			None => "Environment variables".to_string(),
		}
	}
}

/// TOML file configuration source
///
/// A missing file loads as an empty map.
pub struct TomlFileSource {
	path: PathBuf,
}

impl TomlFileSource {
	/// Create a new TOML file configuration source
	///
	/// # Examples
	///
	/// ```
	/// use dtx_conf::TomlFileSource;
	///
	/// let source = TomlFileSource::new("dtx.toml");
	/// ```
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

impl ConfigSource for TomlFileSource {
	fn load(&self) -> Result<IndexMap<String, Value>, SourceError> {
		if !self.path.exists() {
			return Ok(IndexMap::new());
		}

		let content = fs::read_to_string(&self.path)?;
		let toml_value: toml::Value = toml::from_str(&content)?;
		let json_value = serde_json::to_value(toml_value)?;

		let map = json_value
			.as_object()
			.ok_or_else(|| SourceError::Parse("Expected table at root".to_string()))?;

		Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
	}

	fn priority(&self) -> u8 {
		50
	}

	fn description(&self) -> String {
		format!("TOML file: {}", self.path.display())
	}
}

//! Settings loaded from a real TOML file and the process environment

use dtx_conf::{Settings, SettingsError};
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
	let path = dir.path().join("dtx.toml");
	let mut file = std::fs::File::create(&path).unwrap();
	file.write_all(body.as_bytes()).unwrap();
	path
}

#[rstest]
#[serial(dtx_env)]
fn test_env_overrides_toml() {
	let dir = TempDir::new().unwrap();
	let path = write_config(
		&dir,
		r#"
[database]
url = "sqlite://from-file.db"

[flush]
max_batch = 10
interval_ms = 500
"#,
	);

	// SAFETY: Setting environment variables is unsafe in multi-threaded programs.
	// This test uses #[serial] to ensure exclusive access to environment variables.
	unsafe {
		env::set_var("DTX_FLUSH__MAX_BATCH", "30");
		env::set_var("DTX_COORDINATOR__UPDATE_BRANCH_SYNC", "true");
	}

	let settings = Settings::load(Some(path.as_path()));

	// SAFETY: Removing environment variables is unsafe in multi-threaded programs.
	// This test uses #[serial] to ensure exclusive access to environment variables.
	unsafe {
		env::remove_var("DTX_FLUSH__MAX_BATCH");
		env::remove_var("DTX_COORDINATOR__UPDATE_BRANCH_SYNC");
	}

	let settings = settings.unwrap();
	assert_eq!(settings.database.url, "sqlite://from-file.db");
	assert_eq!(settings.flush.max_batch, 30);
	assert_eq!(settings.flush.interval_ms, 500);
	assert!(settings.coordinator.update_branch_sync);
	assert_eq!(settings.recovery.batch_limit, 100);
}

#[rstest]
#[serial(dtx_env)]
fn test_missing_file_yields_defaults() {
	let dir = TempDir::new().unwrap();

	let settings = Settings::load(Some(dir.path().join("absent.toml").as_path())).unwrap();

	assert_eq!(settings, Settings::default());
}

#[rstest]
#[serial(dtx_env)]
fn test_invalid_file_value_is_reported() {
	let dir = TempDir::new().unwrap();
	let path = write_config(&dir, "[flush]\npoll_interval_ms = 300\n");

	let err = Settings::load(Some(path.as_path())).unwrap_err();

	assert!(matches!(err, SettingsError::Invalid { field: "flush.poll_interval_ms", .. }));
}

#[rstest]
#[serial(dtx_env)]
fn test_malformed_toml_is_a_source_error() {
	let dir = TempDir::new().unwrap();
	let path = write_config(&dir, "[flush\nmax_batch = ");

	let err = Settings::load(Some(path.as_path())).unwrap_err();

	assert!(matches!(err, SettingsError::Source(_)));
}

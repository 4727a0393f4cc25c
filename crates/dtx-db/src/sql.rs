//! SQLite store
//!
//! Three tables: `trans_global` keyed by `gid`, `trans_branch` unique on
//! `(gid, branch_id, branch_type)` and ordered by its autoincrement `id`, and the
//! append-only `trans_log`. Timestamps are stored through sqlx's chrono support.

use crate::error::{Result, StoreError};
use crate::store::{CreateOutcome, Store};
use crate::trans_log::{TransLog, TransLogEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dtx_core::{
	BranchStatus, BranchStatusUpdate, GlobalStatus, TransBranch, TransGlobal, TransType,
};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::time::Duration;

const SCHEMA: &[&str] = &[
	"CREATE TABLE IF NOT EXISTS trans_global (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		gid TEXT NOT NULL UNIQUE,
		trans_type TEXT NOT NULL,
		data TEXT NOT NULL DEFAULT '',
		status TEXT NOT NULL,
		query_prepared TEXT,
		create_time TEXT NOT NULL,
		update_time TEXT NOT NULL,
		commit_time TEXT,
		finish_time TEXT,
		rollback_time TEXT
	)",
	"CREATE INDEX IF NOT EXISTS idx_trans_global_status_update
		ON trans_global (status, update_time)",
	"CREATE TABLE IF NOT EXISTS trans_branch (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		gid TEXT NOT NULL,
		branch_id TEXT NOT NULL,
		branch_type TEXT NOT NULL,
		url TEXT NOT NULL,
		data TEXT NOT NULL DEFAULT '',
		status TEXT NOT NULL,
		create_time TEXT NOT NULL,
		update_time TEXT NOT NULL,
		finish_time TEXT,
		rollback_time TEXT,
		UNIQUE (gid, branch_id, branch_type)
	)",
	"CREATE INDEX IF NOT EXISTS idx_trans_branch_gid ON trans_branch (gid)",
	"CREATE TABLE IF NOT EXISTS trans_log (
		id INTEGER PRIMARY KEY AUTOINCREMENT,
		gid TEXT NOT NULL,
		action TEXT NOT NULL,
		new_status TEXT NOT NULL,
		branch TEXT NOT NULL,
		detail TEXT NOT NULL,
		create_time TEXT NOT NULL
	)",
];

const GLOBAL_COLUMNS: &str = "gid, trans_type, data, status, query_prepared, create_time, \
	update_time, commit_time, finish_time, rollback_time";

const BRANCH_COLUMNS: &str = "id, gid, branch_id, branch_type, url, data, status, create_time, \
	update_time, finish_time, rollback_time";

/// Connection settings for [`SqlStore`]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStoreConfig {
	/// Database URL (e.g., "sqlite::memory:", "sqlite://dtx.db?mode=rwc")
	pub url: String,
	pub max_connections: u32,
	pub acquire_timeout: Duration,
}

impl Default for SqlStoreConfig {
	fn default() -> Self {
		Self {
			url: "sqlite://dtx.db?mode=rwc".to_string(),
			max_connections: 10,
			acquire_timeout: Duration::from_secs(30),
		}
	}
}

impl SqlStoreConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			..Default::default()
		}
	}

	pub fn with_max_connections(mut self, max: u32) -> Self {
		self.max_connections = max;
		self
	}

	pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
		self.acquire_timeout = timeout;
		self
	}
}

/// [`Store`] and [`TransLog`] over a SQLite pool
#[derive(Debug, Clone)]
pub struct SqlStore {
	pool: SqlitePool,
}

impl SqlStore {
	/// Open a pool for `config`.
	///
	/// An in-memory URL gets a single connection, since every SQLite connection to
	/// `:memory:` is a separate database.
	pub async fn connect(config: &SqlStoreConfig) -> Result<Self> {
		let max_connections = if config.url.contains(":memory:") {
			1
		} else {
			config.max_connections
		};
		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections)
			.acquire_timeout(config.acquire_timeout)
			.connect(&config.url)
			.await?;
		Ok(Self { pool })
	}

	pub fn from_pool(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	/// Create tables and indexes if they do not exist
	pub async fn migrate(&self) -> Result<()> {
		for statement in SCHEMA {
			sqlx::query(statement).execute(&self.pool).await?;
		}
		tracing::debug!(statements = SCHEMA.len(), "trans schema ensured");
		Ok(())
	}

	/// Entries of one transaction in append order
	pub async fn read_log(&self, gid: &str) -> Result<Vec<TransLogEntry>> {
		let rows = sqlx::query(
			"SELECT gid, action, new_status, branch, detail, create_time \
			FROM trans_log WHERE gid = ? ORDER BY id ASC",
		)
		.bind(gid)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(log_from_row).collect()
	}
}

fn log_from_row(row: &SqliteRow) -> Result<TransLogEntry> {
	Ok(TransLogEntry {
		gid: row.try_get("gid")?,
		action: row.try_get("action")?,
		new_status: row.try_get("new_status")?,
		branch: row.try_get("branch")?,
		detail: row.try_get("detail")?,
		create_time: row.try_get("create_time")?,
	})
}

fn global_from_row(row: &SqliteRow) -> Result<TransGlobal> {
	let trans_type: String = row.try_get("trans_type")?;
	let status: String = row.try_get("status")?;
	Ok(TransGlobal {
		gid: row.try_get("gid")?,
		trans_type: trans_type.parse()?,
		data: row.try_get("data")?,
		status: status.parse()?,
		query_prepared: row.try_get("query_prepared")?,
		create_time: row.try_get("create_time")?,
		update_time: row.try_get("update_time")?,
		commit_time: row.try_get("commit_time")?,
		finish_time: row.try_get("finish_time")?,
		rollback_time: row.try_get("rollback_time")?,
	})
}

fn branch_from_row(row: &SqliteRow) -> Result<TransBranch> {
	let branch_type: String = row.try_get("branch_type")?;
	let status: String = row.try_get("status")?;
	Ok(TransBranch {
		id: row.try_get("id")?,
		gid: row.try_get("gid")?,
		branch_id: row.try_get("branch_id")?,
		branch_type: branch_type.parse()?,
		url: row.try_get("url")?,
		data: row.try_get("data")?,
		status: status.parse()?,
		create_time: row.try_get("create_time")?,
		update_time: row.try_get("update_time")?,
		finish_time: row.try_get("finish_time")?,
		rollback_time: row.try_get("rollback_time")?,
	})
}

fn clamp_limit(limit: usize) -> i64 {
	i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Store for SqlStore {
	async fn create_new(
		&self,
		global: &TransGlobal,
		branches: &[TransBranch],
	) -> Result<CreateOutcome> {
		let mut tx = self.pool.begin().await?;

		let inserted = sqlx::query(&format!(
			"INSERT INTO trans_global ({GLOBAL_COLUMNS}) \
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) ON CONFLICT (gid) DO NOTHING"
		))
		.bind(&global.gid)
		.bind(global.trans_type.as_str())
		.bind(&global.data)
		.bind(global.status.as_str())
		.bind(&global.query_prepared)
		.bind(global.create_time)
		.bind(global.update_time)
		.bind(global.commit_time)
		.bind(global.finish_time)
		.bind(global.rollback_time)
		.execute(&mut *tx)
		.await?
		.rows_affected();

		if inserted == 0 {
			// Only a prepared msg confirming itself may reuse its gid. Its branches
			// were written with the prepare and stay as they are.
			let upgraded = if global.status == GlobalStatus::Submitted
				&& global.trans_type == TransType::Msg
			{
				sqlx::query(
					"UPDATE trans_global SET status = ?, update_time = ? \
					WHERE gid = ? AND status = ? AND trans_type = ?",
				)
				.bind(GlobalStatus::Submitted.as_str())
				.bind(Utc::now())
				.bind(&global.gid)
				.bind(GlobalStatus::Prepared.as_str())
				.bind(TransType::Msg.as_str())
				.execute(&mut *tx)
				.await?
				.rows_affected()
			} else {
				0
			};
			if upgraded == 0 {
				tx.rollback().await?;
				return Err(StoreError::DuplicateIgnored {
					gid: global.gid.clone(),
				});
			}
			tx.commit().await?;
			return Ok(CreateOutcome::Upgraded);
		}

		for branch in branches {
			sqlx::query(
				"INSERT INTO trans_branch \
				(gid, branch_id, branch_type, url, data, status, create_time, update_time, \
				finish_time, rollback_time) \
				VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
				ON CONFLICT (gid, branch_id, branch_type) DO NOTHING",
			)
			.bind(&branch.gid)
			.bind(&branch.branch_id)
			.bind(branch.branch_type.as_str())
			.bind(&branch.url)
			.bind(&branch.data)
			.bind(branch.status.as_str())
			.bind(branch.create_time)
			.bind(branch.update_time)
			.bind(branch.finish_time)
			.bind(branch.rollback_time)
			.execute(&mut *tx)
			.await?;
		}

		tx.commit().await?;
		Ok(CreateOutcome::Inserted)
	}

	async fn find_global(&self, gid: &str) -> Result<Option<TransGlobal>> {
		let row = sqlx::query(&format!(
			"SELECT {GLOBAL_COLUMNS} FROM trans_global WHERE gid = ?"
		))
		.bind(gid)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(global_from_row).transpose()
	}

	async fn find_branches(&self, gid: &str) -> Result<Vec<TransBranch>> {
		let rows = sqlx::query(&format!(
			"SELECT {BRANCH_COLUMNS} FROM trans_branch WHERE gid = ? ORDER BY id ASC"
		))
		.bind(gid)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(branch_from_row).collect()
	}

	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		next: GlobalStatus,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let stamp = next
			.stamp()
			.map(|s| format!(", {} = ?", s.column()))
			.unwrap_or_default();
		let sql = format!(
			"UPDATE trans_global SET status = ?, update_time = ?{stamp} WHERE gid = ? AND status = ?"
		);
		let mut query = sqlx::query(&sql).bind(next.as_str()).bind(now);
		if next.stamp().is_some() {
			query = query.bind(now);
		}
		let result = query
			.bind(gid)
			.bind(expected.as_str())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	async fn update_branch_status(
		&self,
		id: i64,
		expected: BranchStatus,
		next: BranchStatus,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let rollback_time = (next == BranchStatus::Failed).then_some(now);
		let result = sqlx::query(
			"UPDATE trans_branch SET status = ?, update_time = ?, finish_time = ?, \
			rollback_time = COALESCE(?, rollback_time) WHERE id = ? AND status = ?",
		)
		.bind(next.as_str())
		.bind(now)
		.bind(now)
		.bind(rollback_time)
		.bind(id)
		.bind(expected.as_str())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	async fn touch_global(&self, gid: &str, now: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("UPDATE trans_global SET update_time = ? WHERE gid = ?")
			.bind(now)
			.bind(gid)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected())
	}

	async fn update_branches(
		&self,
		updates: &[BranchStatusUpdate],
		now: DateTime<Utc>,
	) -> Result<u64> {
		if updates.is_empty() {
			return Ok(0);
		}

		let cases = " WHEN ? THEN ?".repeat(updates.len());
		let coalesced = " WHEN ? THEN COALESCE(?, rollback_time)".repeat(updates.len());
		let ids = vec!["?"; updates.len()].join(", ");
		let sql = format!(
			"UPDATE trans_branch SET \
			status = CASE id{cases} END, \
			finish_time = CASE id{cases} END, \
			rollback_time = CASE id{coalesced} ELSE rollback_time END, \
			update_time = ? \
			WHERE id IN ({ids})"
		);

		let mut query = sqlx::query(&sql);
		for update in updates {
			query = query.bind(update.id).bind(update.status.as_str());
		}
		for update in updates {
			query = query.bind(update.id).bind(update.finish_time);
		}
		for update in updates {
			query = query.bind(update.id).bind(update.rollback_time());
		}
		query = query.bind(now);
		for update in updates {
			query = query.bind(update.id);
		}

		let result = query.execute(&self.pool).await?;
		Ok(result.rows_affected())
	}

	async fn find_stale(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<TransGlobal>> {
		let rows = sqlx::query(&format!(
			"SELECT {GLOBAL_COLUMNS} FROM trans_global \
			WHERE status NOT IN (?, ?) AND update_time <= ? ORDER BY id ASC LIMIT ?"
		))
		.bind(GlobalStatus::Succeed.as_str())
		.bind(GlobalStatus::Failed.as_str())
		.bind(older_than)
		.bind(clamp_limit(limit))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(global_from_row).collect()
	}

	async fn list_globals(
		&self,
		status: Option<GlobalStatus>,
		limit: usize,
	) -> Result<Vec<TransGlobal>> {
		let rows = match status {
			Some(status) => {
				sqlx::query(&format!(
					"SELECT {GLOBAL_COLUMNS} FROM trans_global WHERE status = ? \
					ORDER BY id ASC LIMIT ?"
				))
				.bind(status.as_str())
				.bind(clamp_limit(limit))
				.fetch_all(&self.pool)
				.await?
			}
			None => {
				sqlx::query(&format!(
					"SELECT {GLOBAL_COLUMNS} FROM trans_global ORDER BY id ASC LIMIT ?"
				))
				.bind(clamp_limit(limit))
				.fetch_all(&self.pool)
				.await?
			}
		};
		rows.iter().map(global_from_row).collect()
	}
}

#[async_trait]
impl TransLog for SqlStore {
	async fn write(&self, entry: &TransLogEntry) -> Result<()> {
		sqlx::query(
			"INSERT INTO trans_log (gid, action, new_status, branch, detail, create_time) \
			VALUES (?, ?, ?, ?, ?, ?)",
		)
		.bind(&entry.gid)
		.bind(&entry.action)
		.bind(&entry.new_status)
		.bind(&entry.branch)
		.bind(&entry.detail)
		.bind(entry.create_time)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

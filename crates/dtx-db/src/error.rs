//! Storage errors

use dtx_core::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	/// Driver or connection failure
	#[error("SQL error: {0}")]
	Sqlx(#[from] sqlx::Error),

	/// Re-submission of an existing transaction; nothing was written
	#[error("Duplicate transaction ignored: {gid}")]
	DuplicateIgnored { gid: String },

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// A persisted row could not be decoded into the data model
	#[error("Corrupt row: {0}")]
	Corrupt(String),
}

impl From<ParseError> for StoreError {
	fn from(err: ParseError) -> Self {
		StoreError::Corrupt(err.to_string())
	}
}

impl StoreError {
	pub fn is_duplicate(&self) -> bool {
		matches!(self, StoreError::DuplicateIgnored { .. })
	}
}

pub type Result<T> = std::result::Result<T, StoreError>;

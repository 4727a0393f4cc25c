//! Coordinator errors

use dtx_core::{BranchStatus, GlobalStatus};
use dtx_db::StoreError;

/// Errors raised while submitting or processing a global transaction.
///
/// Only [`CoordinatorError::Store`] and the payload/invariant variants describe a real
/// fault. A [`CoordinatorError::ConcurrencyConflict`] means another worker got there
/// first; the pass that sees it stops without side effects.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Transaction not found: {0}")]
	NotFound(String),

	/// Identical re-submission; absorbed by `submit_new`
	#[error("Duplicate transaction ignored: {0}")]
	DuplicateIgnored(String),

	/// A conditional update affected zero rows
	#[error("Concurrent update on {gid}: expected {expected} before moving to {target}")]
	ConcurrencyConflict {
		gid: String,
		target: String,
		expected: String,
	},

	#[error("Illegal transition on {gid}: {from} -> {to}")]
	InvalidTransition { gid: String, from: String, to: String },

	#[error("Invalid payload for {gid}: {reason}")]
	InvalidPayload { gid: String, reason: String },

	/// Persisted state that no processor can act on
	#[error("Invariant violated on {gid}: {reason}")]
	Invariant { gid: String, reason: String },

	#[error("Processing of {gid} panicked: {message}")]
	Panicked { gid: String, message: String },

	#[error("Branch status flusher is closed")]
	FlusherClosed,
}

impl CoordinatorError {
	pub fn is_conflict(&self) -> bool {
		matches!(self, CoordinatorError::ConcurrencyConflict { .. })
	}

	pub(crate) fn global_conflict(gid: &str, expected: GlobalStatus, target: GlobalStatus) -> Self {
		CoordinatorError::ConcurrencyConflict {
			gid: gid.to_string(),
			target: target.to_string(),
			expected: expected.to_string(),
		}
	}

	pub(crate) fn branch_conflict(
		gid: &str,
		branch: &str,
		expected: BranchStatus,
		target: BranchStatus,
	) -> Self {
		CoordinatorError::ConcurrencyConflict {
			gid: format!("{gid} {branch}"),
			target: target.to_string(),
			expected: expected.to_string(),
		}
	}

	pub(crate) fn invariant(gid: &str, reason: impl Into<String>) -> Self {
		CoordinatorError::Invariant {
			gid: gid.to_string(),
			reason: reason.into(),
		}
	}

	pub(crate) fn invalid_payload(gid: &str, reason: impl std::fmt::Display) -> Self {
		CoordinatorError::InvalidPayload {
			gid: gid.to_string(),
			reason: reason.to_string(),
		}
	}
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// Transient failure of a participant call; retried on a later pass, never escalated.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
	#[error("HTTP request failed: {0}")]
	Request(#[from] reqwest::Error),

	#[error("Unexpected response {status}: {body}")]
	UnexpectedResponse { status: u16, body: String },

	#[error("Participant unavailable: {0}")]
	Unavailable(String),
}

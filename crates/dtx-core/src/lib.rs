//! # dtx core
//!
//! Data model shared by every dtx crate.
//!
//! A **global transaction** ([`TransGlobal`]) is one coordinated operation. It owns an
//! ordered list of **branches** ([`TransBranch`]), each a single call to a participant
//! service. Both rows carry a status that only ever moves forward along a fixed
//! transition table:
//!
//! ```text
//! prepared ──> submitted ──> succeed
//!    │            │  │
//!    │            │  └──> committed ──> succeed
//!    │            └─────> aborting  ──> failed
//!    └──────────────────────────────────> failed
//! ```
//!
//! Branches are simpler: `prepared ──> succeed | failed`.
//!
//! This crate performs no I/O. Storage lives in `dtx-db`, protocol logic in `dtx-server`.

pub mod model;
pub mod status;

pub use model::{BranchStatusUpdate, TransBranch, TransGlobal};
pub use status::{BranchStatus, BranchType, GlobalStatus, StatusStamp, TransType};

/// Error returned when a persisted or user-supplied label does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseError {
	/// Which enum was being parsed
	pub kind: &'static str,
	/// The offending label
	pub value: String,
}

impl ParseError {
	pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
		Self {
			kind,
			value: value.into(),
		}
	}
}

//! Protocol, role and status enums, plus the legal transition tables.
//!
//! Every enum round-trips through a lowercase label, which is what gets persisted
//! and what appears in the transaction log.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! labeled_enum {
	($name:ident, $kind:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
		impl $name {
			/// Every variant, in declaration order
			pub const ALL: &'static [$name] = &[$($name::$variant),+];

			/// Persisted label of this variant
			pub fn as_str(&self) -> &'static str {
				match self {
					$($name::$variant => $label),+
				}
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(self.as_str())
			}
		}

		impl FromStr for $name {
			type Err = ParseError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				match s {
					$($label => Ok($name::$variant),)+
					other => Err(ParseError::new($kind, other)),
				}
			}
		}
	};
}

/// Coordination protocol of a global transaction. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransType {
	/// Forward actions with compensating undo actions
	Saga,
	/// Try, then confirm or cancel
	Tcc,
	/// Prepare, durable decision, then commit or rollback
	Xa,
	/// Reliable message delivery
	Msg,
}

labeled_enum!(TransType, "trans type", {
	Saga => "saga",
	Tcc => "tcc",
	Xa => "xa",
	Msg => "msg",
});

/// Protocol-specific role of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchType {
	Action,
	Compensate,
	Try,
	Confirm,
	Cancel,
	Prepare,
	Commit,
	Rollback,
}

labeled_enum!(BranchType, "branch type", {
	Action => "action",
	Compensate => "compensate",
	Try => "try",
	Confirm => "confirm",
	Cancel => "cancel",
	Prepare => "prepare",
	Commit => "commit",
	Rollback => "rollback",
});

/// Timestamp column stamped by a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusStamp {
	Commit,
	Finish,
	Rollback,
}

impl StatusStamp {
	/// Column name in the persisted schema
	pub fn column(&self) -> &'static str {
		match self {
			StatusStamp::Commit => "commit_time",
			StatusStamp::Finish => "finish_time",
			StatusStamp::Rollback => "rollback_time",
		}
	}
}

/// Status of a global transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalStatus {
	/// Registered but not yet confirmed (message transactions only)
	Prepared,
	/// Accepted and being driven forward
	Submitted,
	/// Commit decision recorded; second round in progress
	Committed,
	/// Rollback decision recorded; compensation/cancel/rollback in progress
	Aborting,
	Succeed,
	Failed,
}

labeled_enum!(GlobalStatus, "global status", {
	Prepared => "prepared",
	Submitted => "submitted",
	Committed => "committed",
	Aborting => "aborting",
	Succeed => "succeed",
	Failed => "failed",
});

const GLOBAL_TRANSITIONS: &[(GlobalStatus, GlobalStatus)] = &[
	(GlobalStatus::Prepared, GlobalStatus::Submitted),
	(GlobalStatus::Prepared, GlobalStatus::Failed),
	(GlobalStatus::Submitted, GlobalStatus::Committed),
	(GlobalStatus::Submitted, GlobalStatus::Aborting),
	(GlobalStatus::Submitted, GlobalStatus::Succeed),
	(GlobalStatus::Committed, GlobalStatus::Succeed),
	(GlobalStatus::Aborting, GlobalStatus::Failed),
];

impl GlobalStatus {
	/// Legal `(from, to)` edges
	pub fn transitions() -> &'static [(GlobalStatus, GlobalStatus)] {
		GLOBAL_TRANSITIONS
	}

	pub fn can_transition_to(self, next: GlobalStatus) -> bool {
		GLOBAL_TRANSITIONS.contains(&(self, next))
	}

	pub fn is_terminal(self) -> bool {
		matches!(self, GlobalStatus::Succeed | GlobalStatus::Failed)
	}

	/// Timestamp set when a row enters this status
	pub fn stamp(self) -> Option<StatusStamp> {
		match self {
			GlobalStatus::Committed => Some(StatusStamp::Commit),
			GlobalStatus::Succeed => Some(StatusStamp::Finish),
			GlobalStatus::Failed => Some(StatusStamp::Rollback),
			_ => None,
		}
	}

	/// Whether `target` is reachable from `self` through zero or more legal edges
	pub fn reaches(self, target: GlobalStatus) -> bool {
		let mut frontier = vec![self];
		let mut seen = Vec::new();
		while let Some(current) = frontier.pop() {
			if current == target {
				return true;
			}
			if seen.contains(&current) {
				continue;
			}
			seen.push(current);
			frontier.extend(
				GLOBAL_TRANSITIONS
					.iter()
					.filter(|(from, _)| *from == current)
					.map(|(_, to)| *to),
			);
		}
		false
	}
}

/// Status of a single branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
	Prepared,
	Succeed,
	Failed,
}

labeled_enum!(BranchStatus, "branch status", {
	Prepared => "prepared",
	Succeed => "succeed",
	Failed => "failed",
});

const BRANCH_TRANSITIONS: &[(BranchStatus, BranchStatus)] = &[
	(BranchStatus::Prepared, BranchStatus::Succeed),
	(BranchStatus::Prepared, BranchStatus::Failed),
];

impl BranchStatus {
	/// Legal `(from, to)` edges
	pub fn transitions() -> &'static [(BranchStatus, BranchStatus)] {
		BRANCH_TRANSITIONS
	}

	pub fn can_transition_to(self, next: BranchStatus) -> bool {
		BRANCH_TRANSITIONS.contains(&(self, next))
	}

	pub fn is_terminal(self) -> bool {
		!matches!(self, BranchStatus::Prepared)
	}
}

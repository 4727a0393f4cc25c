//! Data model: transactions, branches, statuses and their transition tables.
//!
//! # Examples
//!
//! ```rust
//! use dtx::core::GlobalStatus;
//!
//! assert!(GlobalStatus::Submitted.can_transition_to(GlobalStatus::Aborting));
//! assert!(!GlobalStatus::Succeed.can_transition_to(GlobalStatus::Failed));
//! ```

pub use dtx_core::*;

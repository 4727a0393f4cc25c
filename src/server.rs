//! Coordinator core: processors, branch status flusher and recovery poller.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dtx::server::{Coordinator, RecoveryPoller};
//! ```

pub use dtx_server::*;

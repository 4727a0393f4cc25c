//! Storage contract, transaction log and the SQLite store.

pub use dtx_db::*;

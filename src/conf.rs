//! Layered settings: defaults, TOML file, `DTX_*` environment variables.

pub use dtx_conf::*;

//! yac-core — error taxonomy, configuration, constants, and data model
//! shared by every other `yac-*` crate.

pub mod config;
pub mod consts;
pub mod error;
pub mod props;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};

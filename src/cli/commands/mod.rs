//! CLI command implementations

pub mod cache;
pub mod config;

pub use cache::{get, info, put};
pub use config::execute as config;

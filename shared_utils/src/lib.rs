//! Small helpers shared by the downloader crates.

pub mod config;
pub mod env;

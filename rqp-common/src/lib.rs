//! # RQP Common Library
//!
//! Shared code for the research query pipeline crates:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Database bootstrap (connection pool and table creation)
//! - Time utilities

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};

//! # labelsync common library
//!
//! Shared code for the labelsync server and its tooling:
//! - Error type
//! - Configuration loading and root folder resolution
//! - Tracking number normalization
//! - Timestamp and calendar-day helpers
//! - Database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;
pub mod tracking;

pub use error::{Error, Result};
pub use tracking::normalize_tracking;

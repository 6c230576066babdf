//! Error type shared by the labelsync crates
//!
//! The server maps these onto HTTP statuses: `NotFound` → 404,
//! `InvalidInput` → 400, everything else → 500.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable config file or unusable root folder
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown credential, tracking number or bundle
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad date, access code or timestamp supplied by a caller
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Broken invariant, e.g. a row missing right after its insert
    #[error("Internal error: {0}")]
    Internal(String),
}

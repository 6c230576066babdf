//! Domain services for label distribution
//!
//! - Mapping store and version token
//! - Per-day archive builder
//! - Cache-aware file delivery
//! - Progress registry for background jobs
//! - Access code authenticator
//! - Ingest jobs (order import, label upload, rebuild)

pub mod archive_builder;
pub mod authenticator;
pub mod delivery;
pub mod ingest;
pub mod mapping_store;
pub mod progress;

pub use archive_builder::{ArchiveBuilder, ArchiveError, ArchiveRecord, BuildReport};
pub use authenticator::{AccessAuthenticator, AuthError};
pub use mapping_store::{
    AlignmentReport, ImportRow, ImportStats, MappingSnapshot, MappingStore, UpsertOutcome,
};
pub use progress::{ProgressEvent, ProgressRecord, ProgressRegistry, ProgressUpdate};

//! Database access for labelsync-server
//!
//! Schema creation lives in `labelsync_common::db`; these modules hold the
//! queries. Read helpers take the pool, write helpers take a connection so the
//! same function works inside or outside a transaction.

pub mod credentials;
pub mod files;
pub mod mappings;
pub mod meta;

pub use credentials::ClientCredential;
pub use files::TrackingFile;
pub use mappings::OrderMapping;

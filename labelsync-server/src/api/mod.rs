//! HTTP API handlers for labelsync-server

pub mod admin;
pub mod auth;
pub mod client;
pub mod health;
pub mod progress;

pub use admin::admin_routes;
pub use auth::{admin_token_middleware, client_code_middleware};
pub use client::client_routes;
pub use health::health_routes;
pub use progress::progress_routes;

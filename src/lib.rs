//! Field sync server
//!
//! Backend for field data collection: persists features captured by mobile
//! and web clients and reconciles offline edits through a timestamp-based
//! bi-directional sync protocol.

pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod routes;
pub mod state;
pub mod sync;
pub mod timestamp;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;

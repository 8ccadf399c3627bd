//! Feature synchronization
//!
//! Bi-directional sync between field clients and the server:
//! - Wire parsing of client batches and the pull payload
//! - Last-writer-wins conflict resolution
//! - Transactional application and change-set extraction
//! - Server-authoritative edits from the web map editor

mod apply;
mod changes;
mod conflict;
mod service;
mod types;
mod web;

pub use apply::*;
pub use changes::*;
pub use conflict::*;
pub use service::*;
pub use types::*;
pub use web::*;

//! Pulsecast Storage - Database abstraction for campaigns, messages and links
//!
//! This crate provides the persistence contracts the dispatch engine relies on,
//! with a PostgreSQL implementation and an in-memory implementation used for
//! tests and embedded setups.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;

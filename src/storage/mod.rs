//! Storage layer for caresync.
//!
//! SQLite-backed persistence for the offline mutation queue.

mod database;
mod migrations;
mod store;

pub use database::Database;
pub use store::QueueStore;

#[cfg(test)]
pub use store::MockQueueStore;

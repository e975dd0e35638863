//! caresync - offline mutation queue and sync coordinator
//!
//! This crate queues local writes against a remote health records server
//! in a durable SQLite store and replays them through a pluggable apply
//! port once connectivity allows.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod output;
pub mod storage;
pub mod sync;

pub use cli::args::{Cli, Commands, OutputFormat};
pub use error::SyncError;
pub use sync::{OperationQueue, SyncCoordinator};

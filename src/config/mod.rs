//! Configuration management for caresync.
//!
//! This module handles loading configuration from the data root.

mod paths;
mod settings;

pub use paths::{Paths, HOME_ENV};
pub use settings::{AdapterConfig, BackoffStrategy, Config, GeneralConfig, SyncConfig};

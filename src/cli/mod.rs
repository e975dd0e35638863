//! Command-line interface for caresync.

pub mod args;
pub mod commands;

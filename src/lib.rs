// Library module for bucket-publish
// Re-exports modules for use in integration tests and the binary

pub mod cli;
pub mod config;
pub mod error;
pub mod fs;
pub mod sync;

pub use error::{Result, StoreError, SyncError};

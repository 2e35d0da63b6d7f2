//! Durable storage for Haven.
//!
//! This module provides:
//! - The on-disk layout of the data directory
//! - Atomic write-temporary-then-rename file replacement
//! - Secure (overwrite-then-unlink) file erasure
//! - The secret store and the persisted vault configuration
//!
//! # Concurrency
//! Atomic replacement is the sole concurrency primitive. Concurrent
//! writers from separate processes are last-write-wins; within one
//! process, each store instance serializes its load-mutate-save sequences
//! behind an internal mutex.

pub mod atomic;
pub mod config;
pub mod paths;
pub mod secrets;

pub use atomic::{secure_delete, write_atomic, MODE_DIR, MODE_PRIVATE, MODE_PUBLIC};
pub use config::{ConfigStore, VaultConfig};
pub use paths::StorePaths;
pub use secrets::SecretStore;

//! Kandalf Common - Shared lifecycle primitives and utilities
//!
//! This crate provides the pieces every Kandalf component depends on:
//! - Local network address discovery
//! - Go-style duration parsing for configuration values
//! - Process lifecycle primitives (shutdown signal, liveness flag, task group)
//! - The `Worker` contract started under leadership control

pub mod error;
pub mod lifecycle;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::ResolutionError;
pub use lifecycle::{RunnableWorker, ShutdownSignal, TaskGroup};
pub use traits::{Worker, WorkerFactory, start_worker};
pub use utils::{InterfaceSource, SystemInterfaces, parse_duration, resolve_local_address};

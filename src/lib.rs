//! # syncqueue
//!
//! SQLite-backed durable work queue for buffering tracker sync operations
//! across threads and process restarts.
//!
//! Provides a FIFO queue of JSON payloads (one connection per thread,
//! immediate-mode transactions for dequeue), environment configuration,
//! and OpenTelemetry observability.

pub mod config;
pub mod error;
pub mod queue;
pub mod telemetry;

pub use queue::{QueueOptions, SqliteQueue};

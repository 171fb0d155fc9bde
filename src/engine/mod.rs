//! Worker loop: notification wake-ups, polling fallback, queue draining.

pub mod worker;

pub use worker::{Worker, WorkerConfig};

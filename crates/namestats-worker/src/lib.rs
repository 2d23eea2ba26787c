//! # namestats-worker
//!
//! Durable job queue facade, the per-job dataset processor, and the worker
//! pool that drains the queue.

pub mod processor;
pub mod queue;
pub mod retry;
pub mod runner;

pub use processor::{DatasetProcessor, ProcessOutcome, ProcessorDeps};
pub use queue::{JobQueue, QueueStats};
pub use retry::RetryPolicy;
pub use runner::WorkerPool;

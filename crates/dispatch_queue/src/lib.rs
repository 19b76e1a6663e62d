//! # Dispatch Queue
//!
//! In-memory buffer between request producers and dispatcher workers.
//!
//! Guarantees:
//! - Events of one path leave the queue in `sequence` order
//! - An event with a dependency is held back until that sequence finished
//! - A path is leased to at most one consumer at a time
//! - Batches rotate across paths so a busy path cannot starve the others
//! - Producers block (or get their event back) above the high-water mark;
//!   nothing is dropped silently

mod batch;
mod error;
mod queue;

pub use batch::{Batch, PathGroup, PathLease};
pub use error::EnqueueError;
pub use queue::{Enqueued, OrderedDispatchQueue, QueueConfig, QueueStats};

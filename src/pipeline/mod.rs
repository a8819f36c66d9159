//! Claiming and finishing evidence items.

mod job;
mod queue;

pub use job::{JobOutcome, ProcessJob};
pub use queue::QueueProcessor;

//! Superstep scheduling: running the current frontier's nodes concurrently,
//! gated by per-node channel-version change detection.

pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerError, SchedulerState, StepRunResult};

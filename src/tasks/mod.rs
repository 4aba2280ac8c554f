//! Task Executor Module
//!
//! Maps task type tags to executable Rust code and ships the built-in
//! compute executors.
//!
//! ## Core Concepts
//! - **Static dispatch by tag**: the registry is populated at worker startup;
//!   a tag nobody registered yields a typed failure, not a load error.
//! - **Checkpoint capability**: executors receive a single callback for saving
//!   progress. The callback's reply carries the refreshed lease deadline, so
//!   long-running executors can pace themselves against their lease.

pub mod prime;
pub mod registry;


pub use registry::{CheckpointAck, CheckpointFn, ResumeState, TaskContext, TaskFn, TaskRegistry};

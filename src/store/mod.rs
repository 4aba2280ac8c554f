//! Durable Store Module
//!
//! SQLite-backed persistence for the four queue tables: tasks, task_results,
//! checkpoints and workers.
//!
//! ## Core Concepts
//! - **Single transition point**: every task state change is one `BEGIN IMMEDIATE`
//!   transaction, so concurrent claimers, submitters and the monitor serialize
//!   at the database rather than on an in-process lock.
//! - **Leases**: an `in_progress` task always carries an owner and a lease
//!   deadline. Submissions and checkpoints re-check both against the clock.
//! - **Reclaim, not reassign**: expired or orphaned work goes back to `pending`;
//!   the claim path stays the only way into `in_progress`.

pub mod db;
pub mod types;

#[cfg(test)]
mod tests;

pub use db::Store;
pub use types::*;

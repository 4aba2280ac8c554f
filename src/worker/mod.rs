//! Worker Module
//!
//! The stateless puller. Claims tasks over HTTP, runs the matching executor,
//! submits the result, and survives coordinator outages through a durable
//! local submission cache.
//!
//! ## Core Mechanisms
//! - **Pull loop**: claim → execute → submit; the coordinator never calls in.
//! - **Liveness**: a heartbeat ticker runs beside the executor so a busy task
//!   never makes the worker look dead.
//! - **Lease loss**: discovered only at submit/checkpoint time (409); the
//!   local attempt is discarded, never retried.
//! - **Submission cache**: results that cannot be delivered are parked on
//!   disk, retried on a timer, and drained on restart before any new claim.
//!
//! ## Submodules
//! - **`client`**: typed HTTP client for the coordinator API.
//! - **`cache`**: the durable submission cache.
//! - **`runner`**: the main loop wiring it all together.

pub mod cache;
pub mod client;
pub mod runner;

#[cfg(test)]
mod tests;

pub use runner::Worker;

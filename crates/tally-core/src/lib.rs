//! # tally-core
//!
//! Foundation types and logging setup shared by the Tally crates.
//!
//! - **Branded IDs**: [`GroupId`] and [`UserId`] as integer newtypes, so a
//!   user ID can never be passed where a group ID is expected
//! - **Logging**: [`logging::init_subscriber`] for the process-wide `tracing`
//!   subscriber, plus in-memory capture for tests

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::{GroupId, UserId};

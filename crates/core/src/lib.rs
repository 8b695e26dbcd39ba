#![forbid(unsafe_code)]

//! Domain model for the test-attempt session engine.
//!
//! Everything here is pure: no I/O, no async, no clocks other than the
//! injectable [`Clock`]. The services crate drives these types against the
//! remote backend and the local attempt pointer store.

pub mod error;
pub mod model;
pub mod time;

pub use error::Error;
pub use time::Clock;

#![forbid(unsafe_code)]

//! Durable resume pointer: `test id → attempt id`, nothing else.

pub mod repository;
pub mod sqlite;

pub use repository::{AttemptStore, InMemoryAttemptStore, Storage, StorageError};

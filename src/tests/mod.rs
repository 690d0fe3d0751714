//! Test-only helpers shared across the crate's unit tests.

pub mod shared;

//! Common utilities for mirrorfs integration tests.

#![allow(dead_code)]

pub mod assertions;
pub mod harness;

pub use assertions::*;
pub use harness::{TestVfs, init_tracing};

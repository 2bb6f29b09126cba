//! Shared test utilities for invoicer integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a `BatchProcessor` to an in-memory store and a scripted model
//! - Mock collaborators (`MockInference`, `FailingStore`) and PNG fixture builders

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;

//! # softly-proto
//!
//! Shared types, error definitions, and traits for the Softly soft assertion framework.
//!
//! This crate provides the foundational abstractions used across all Softly crates,
//! including:
//! - The `Failure` record every soft assertion produces
//! - The `ErrorCollector` trait providers report into
//! - Fatal error types that must never be confused with collected failures

mod collector;
mod error;
mod failure;

pub use collector::ErrorCollector;
pub use error::{Error, Result};
pub use failure::{Failure, FailureLocation};

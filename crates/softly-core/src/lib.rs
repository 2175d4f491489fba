//! # softly-core
//!
//! Soft assertions for Rust tests: assertion failures are collected instead
//! of panicking, then reported together when the test ends.
//!
//! This crate provides:
//! - The storing, delegating error collector providers embed
//! - A per-thread collector for class instances shared by concurrent tests
//! - The aggregate "Multiple Failures" error
//! - Standard providers with a small fluent check surface
//! - Execution contexts and the binder a test runner drives to route each
//!   test's failures to that test's collector
//! - Report settings loaded from YAML and the environment

mod aggregate;
mod assertions;
pub mod binder;
mod collector;
mod config;
pub mod context;
pub mod diagnostics;
pub mod injection;
mod provider;
pub mod testing;
mod thread_keyed;

pub use aggregate::{MultipleFailuresError, aggregate, assert_all};
pub use assertions::{AutoAssertAll, BddSoftAssertions, SoftAssert, SoftAssertions, assert_softly};
pub use binder::{ProviderRegistry, SoftAssertionsBinder, TestOutcomeError};
pub use collector::{DefaultErrorCollector, FailureCallback};
pub use config::{DEFAULT_HEADING, ReportConfig, SoftlyConfig};
pub use context::{ContextTree, ExecutionContext};
pub use diagnostics::init_tracing;
pub use injection::{DeclaredType, Executable, FieldDescriptor, ParameterDescriptor};
pub use provider::{ProviderInstance, ProviderType, SoftAssertionsProvider};
pub use thread_keyed::ThreadKeyedCollector;

pub use softly_proto::{Error, ErrorCollector, Failure, FailureLocation, Result};

//! Testing utilities that stand in for a test runner.

pub mod scenario;

pub use scenario::{ScenarioRunner, TestArgs, TestCase, TestClass, TestOutcome, TestResult};

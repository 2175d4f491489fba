//! The standard providers and their fluent check surface.
//!
//! # Example
//!
//! ```
//! use softly_core::{SoftAssertions, SoftAssertionsProvider};
//!
//! let softly = SoftAssertions::new();
//! softly.assert_that("frodo".len()).is_equal_to(5);
//! softly.assert_that(Some(3)).described_as("ring bearers").is_none();
//! softly.assert_that(2 + 2 == 5).is_true();
//!
//! let error = softly.assert_all().unwrap_err();
//! assert_eq!(error.len(), 2);
//! ```

use crate::aggregate::MultipleFailuresError;
use crate::collector::DefaultErrorCollector;
use crate::config::ReportConfig;
use crate::provider::SoftAssertionsProvider;
use softly_proto::{Failure, FailureLocation};
use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::thread;

/// Soft assertions entered with `assert_that`.
#[derive(Debug, Default)]
pub struct SoftAssertions {
    collector: DefaultErrorCollector,
    report: ReportConfig,
}

impl SoftAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(report: ReportConfig) -> Self {
        Self {
            collector: DefaultErrorCollector::new(),
            report,
        }
    }

    #[track_caller]
    pub fn assert_that<T>(&self, actual: T) -> SoftAssert<'_, T> {
        SoftAssert::new(self, actual, FailureLocation::caller())
    }
}

impl SoftAssertionsProvider for SoftAssertions {
    fn error_collector(&self) -> &DefaultErrorCollector {
        &self.collector
    }

    fn report_config(&self) -> ReportConfig {
        self.report.clone()
    }
}

/// Soft assertions entered with `then`, for given/when/then style tests.
#[derive(Debug, Default)]
pub struct BddSoftAssertions {
    collector: DefaultErrorCollector,
    report: ReportConfig,
}

impl BddSoftAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(report: ReportConfig) -> Self {
        Self {
            collector: DefaultErrorCollector::new(),
            report,
        }
    }

    #[track_caller]
    pub fn then<T>(&self, actual: T) -> SoftAssert<'_, T> {
        SoftAssert::new(self, actual, FailureLocation::caller())
    }
}

impl SoftAssertionsProvider for BddSoftAssertions {
    fn error_collector(&self) -> &DefaultErrorCollector {
        &self.collector
    }

    fn report_config(&self) -> ReportConfig {
        self.report.clone()
    }
}

/// A value under soft assertion.
///
/// Every check reports to the owning provider and hands the assertion back,
/// so checks chain. A failing check never stops the chain.
pub struct SoftAssert<'a, T> {
    provider: &'a dyn SoftAssertionsProvider,
    actual: T,
    description: Option<String>,
    location: FailureLocation,
}

impl<'a, T> SoftAssert<'a, T> {
    /// Starts an assertion on `actual` reporting to `provider`.
    pub fn new(
        provider: &'a dyn SoftAssertionsProvider,
        actual: T,
        location: FailureLocation,
    ) -> Self {
        Self {
            provider,
            actual,
            description: None,
            location,
        }
    }

    /// Prefixes every failure message of this chain with `[description]`.
    #[must_use]
    pub fn described_as(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn actual(&self) -> &T {
        &self.actual
    }

    /// Passes when `predicate` holds; `expectation` describes it in the failure.
    pub fn satisfies(self, predicate: impl FnOnce(&T) -> bool, expectation: &str) -> Self {
        let passed = predicate(&self.actual);
        self.report(passed, || format!("Expecting actual to satisfy: {expectation}"));
        self
    }

    fn report(&self, passed: bool, message: impl FnOnce() -> String) {
        if passed {
            self.provider.succeeded();
        } else {
            let mut failure = Failure::new(message()).with_location(self.location.clone());
            if let Some(description) = &self.description {
                failure = failure.with_description(description.clone());
            }
            self.provider.collect_assertion_error(failure);
        }
    }
}

impl<T: Debug> SoftAssert<'_, T> {
    pub fn is_equal_to<U>(self, expected: U) -> Self
    where
        T: PartialEq<U>,
        U: Debug,
    {
        let passed = self.actual == expected;
        self.report(passed, || {
            format!("expected: {expected:?}\n but was: {:?}", self.actual)
        });
        self
    }

    pub fn is_not_equal_to<U>(self, other: U) -> Self
    where
        T: PartialEq<U>,
        U: Debug,
    {
        let passed = self.actual != other;
        self.report(passed, || {
            format!("Expecting actual:\n  {:?}\nnot to be equal to:\n  {other:?}", self.actual)
        });
        self
    }

    pub fn matches(self, predicate: impl FnOnce(&T) -> bool) -> Self {
        let passed = predicate(&self.actual);
        self.report(passed, || {
            format!("Expecting actual:\n  {:?}\nto match given predicate", self.actual)
        });
        self
    }
}

impl SoftAssert<'_, bool> {
    pub fn is_true(self) -> Self {
        let passed = self.actual;
        self.report(passed, || "Expecting value to be true but was false".to_string());
        self
    }

    pub fn is_false(self) -> Self {
        let passed = !self.actual;
        self.report(passed, || "Expecting value to be false but was true".to_string());
        self
    }
}

impl<V: Debug> SoftAssert<'_, Option<V>> {
    pub fn is_some(self) -> Self {
        let passed = self.actual.is_some();
        self.report(passed, || "Expecting Option to contain a value but it was None".to_string());
        self
    }

    pub fn is_none(self) -> Self {
        let passed = self.actual.is_none();
        self.report(passed, || {
            format!("Expecting Option to be None but was: {:?}", self.actual)
        });
        self
    }
}

impl<V: Debug, E: Debug> SoftAssert<'_, Result<V, E>> {
    pub fn is_ok(self) -> Self {
        let passed = self.actual.is_ok();
        self.report(passed, || format!("Expecting Ok but was: {:?}", self.actual));
        self
    }

    pub fn is_err(self) -> Self {
        let passed = self.actual.is_err();
        self.report(passed, || format!("Expecting Err but was: {:?}", self.actual));
        self
    }
}

/// Runs `body` against fresh soft assertions and returns their aggregate.
///
/// ```
/// let outcome = softly_core::assert_softly(|softly| {
///     softly.assert_that(1).is_equal_to(1);
/// });
/// assert!(outcome.is_ok());
/// ```
pub fn assert_softly(body: impl FnOnce(&SoftAssertions)) -> Result<(), MultipleFailuresError> {
    let softly = SoftAssertions::new();
    body(&softly);
    softly.assert_all()
}

/// Owns a provider and asserts all of its failures when dropped.
///
/// Drop panics with the aggregate error if anything failed, unless the
/// thread is already unwinding.
#[derive(Debug, Default)]
pub struct AutoAssertAll<P: SoftAssertionsProvider> {
    provider: P,
}

impl<P: SoftAssertionsProvider> AutoAssertAll<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: SoftAssertionsProvider> Deref for AutoAssertAll<P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.provider
    }
}

impl<P: SoftAssertionsProvider> DerefMut for AutoAssertAll<P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.provider
    }
}

impl<P: SoftAssertionsProvider> Drop for AutoAssertAll<P> {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        if let Err(error) = self.provider.assert_all() {
            panic!("{error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passing_checks_record_success_only() {
        let softly = SoftAssertions::new();
        softly
            .assert_that(vec![1, 2, 3])
            .is_equal_to(vec![1, 2, 3])
            .is_not_equal_to(vec![3, 2, 1])
            .matches(|v| v.len() == 3);

        assert!(softly.had_any_success());
        assert!(softly.assertion_errors_collected().is_empty());
        assert!(softly.assert_all().is_ok());
    }

    #[test]
    fn test_failing_chain_keeps_going() {
        let softly = SoftAssertions::new();
        softly
            .assert_that("abc")
            .is_equal_to("abd")
            .satisfies(|s| s.starts_with('x'), "starts with x")
            .is_not_equal_to("abc");

        let failures = softly.assertion_errors_collected();
        assert_eq!(failures.len(), 3);
        assert_eq!(failures[0].message, "expected: \"abd\"\n but was: \"abc\"");
        assert_eq!(failures[1].message, "Expecting actual to satisfy: starts with x");
    }

    #[test]
    fn test_description_and_location_attached() {
        let softly = SoftAssertions::new();
        softly.assert_that(1).described_as("answer").is_equal_to(2);

        let failure = &softly.assertion_errors_collected()[0];
        assert_eq!(failure.description.as_deref(), Some("answer"));
        assert!(failure.location.as_ref().unwrap().file.ends_with("assertions.rs"));
    }

    #[test]
    fn test_bool_option_result_checks() {
        let softly = BddSoftAssertions::new();
        softly.then(true).is_true();
        softly.then(true).is_false();
        softly.then(Some(1)).is_some();
        softly.then(Some(1)).is_none();
        softly.then(Ok::<i32, String>(1)).is_ok();
        softly.then(Err::<i32, String>("nope".into())).is_ok();
        softly.then(Err::<i32, String>("nope".into())).is_err();

        let messages: Vec<_> = softly
            .assertion_errors_collected()
            .into_iter()
            .map(|f| f.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Expecting value to be false but was true",
                "Expecting Option to be None but was: Some(1)",
                "Expecting Ok but was: Err(\"nope\")",
            ]
        );
    }

    #[test]
    fn test_assert_softly_reports_aggregate() {
        let error = assert_softly(|softly| {
            softly.assert_that(1).is_equal_to(2);
            softly.assert_that("a").is_equal_to("b");
        })
        .unwrap_err();

        assert!(error.to_string().starts_with("Multiple Failures (2 failures)"));
    }

    #[test]
    fn test_custom_heading_from_config() {
        let softly = SoftAssertions::with_config(ReportConfig {
            heading: "Soft checks".into(),
            include_locations: false,
        });
        softly.fail("boom");

        assert_eq!(
            softly.assert_all().unwrap_err().to_string(),
            "Soft checks (1 failure)\n-- failure 1 --\nboom"
        );
    }

    #[test]
    fn test_auto_assert_all_quiet_when_clean() {
        let softly = AutoAssertAll::new(SoftAssertions::new());
        softly.assert_that(1).is_equal_to(1);
    }

    #[test]
    #[should_panic(expected = "Multiple Failures (1 failure)")]
    fn test_auto_assert_all_panics_on_drop() {
        let softly = AutoAssertAll::<SoftAssertions>::default();
        softly.assert_that(1).is_equal_to(2);
    }
}

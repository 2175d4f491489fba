//! Turning collected failures into the single error a test fails with.

use crate::config::ReportConfig;
use softly_proto::{ErrorCollector, Failure};
use std::fmt::Write;

/// Every soft assertion failure of one test, raised together.
///
/// Rendered as a count header followed by each failure numbered in the order
/// it was recorded:
///
/// ```text
/// Multiple Failures (2 failures)
/// -- failure 1 --
/// bad length
/// -- failure 2 --
/// bad equality
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.report, .failures))]
pub struct MultipleFailuresError {
    report: ReportConfig,
    failures: Vec<Failure>,
}

impl MultipleFailuresError {
    /// Builds the error with the default report settings.
    pub fn new(failures: Vec<Failure>) -> Self {
        Self::with_config(failures, &ReportConfig::default())
    }

    pub fn with_config(failures: Vec<Failure>, config: &ReportConfig) -> Self {
        Self {
            report: config.clone(),
            failures,
        }
    }

    /// Replaces the heading, e.g. with the description of the object under test.
    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.report.heading = heading.into();
        self
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<Failure> {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn render(report: &ReportConfig, failures: &[Failure]) -> String {
    let count = failures.len();
    let noun = if count == 1 { "failure" } else { "failures" };
    let mut text = format!("{} ({count} {noun})", report.heading);
    for (index, failure) in failures.iter().enumerate() {
        let _ = write!(
            text,
            "\n-- failure {} --\n{}",
            index + 1,
            failure.render(report.include_locations)
        );
    }
    text
}

/// Builds the aggregate for `failures`, or `None` when there is nothing to report.
///
/// A single failure is wrapped like any other count so callers always see
/// the same error shape.
pub fn aggregate(failures: Vec<Failure>, config: &ReportConfig) -> Option<MultipleFailuresError> {
    if failures.is_empty() {
        return None;
    }
    Some(MultipleFailuresError::with_config(failures, config))
}

/// Fails with the aggregate of everything `collector` recorded.
pub fn assert_all(
    collector: &dyn ErrorCollector,
    config: &ReportConfig,
) -> Result<(), MultipleFailuresError> {
    match aggregate(collector.failures(), config) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

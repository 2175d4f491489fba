//! The record produced by a failed soft assertion.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::Location;

/// Source position of the assertion that produced a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl FailureLocation {
    /// Captures the location of the caller.
    ///
    /// Only meaningful when every frame between the assertion call site and
    /// here is `#[track_caller]`.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl From<&Location<'_>> for FailureLocation {
    fn from(location: &Location<'_>) -> Self {
        Self {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for FailureLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A single assertion failure, recorded instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Human readable reason for the failure.
    pub message: String,

    /// Optional description given to the assertion (`described_as`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Where the assertion was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FailureLocation>,
}

impl Failure {
    /// Creates a failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            description: None,
            location: None,
        }
    }

    /// Creates a failure located at the caller.
    #[track_caller]
    pub fn here(message: impl Into<String>) -> Self {
        Self::new(message).with_location(FailureLocation::caller())
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: FailureLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Builds a failure from the payload of a caught panic.
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "panicked with a non-string payload".to_string()
        };
        Self::new(message)
    }

    /// Renders the failure the way it appears inside an aggregate report.
    ///
    /// The description comes first as `[description] `, followed by the
    /// message and, when requested, the `at file:line:column` trailer.
    pub fn render(&self, include_location: bool) -> String {
        let mut text = String::new();
        if let Some(description) = &self.description {
            text.push_str(&format!("[{description}] \n"));
        }
        text.push_str(&self.message);
        if include_location && let Some(location) = &self.location {
            text.push_str(&format!("\nat {location}"));
        }
        text
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(true))
    }
}

impl From<&str> for Failure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Failure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_message() {
        let failure = Failure::new("bad length");
        assert_eq!(failure.render(true), "bad length");
    }

    #[test]
    fn test_render_with_description_and_location() {
        let failure = Failure::new("expected 1 but was 2")
            .with_description("size")
            .with_location(FailureLocation {
                file: "tests/user.rs".into(),
                line: 12,
                column: 5,
            });

        assert_eq!(
            failure.render(true),
            "[size] \nexpected 1 but was 2\nat tests/user.rs:12:5"
        );
        assert_eq!(failure.render(false), "[size] \nexpected 1 but was 2");
    }

    #[test]
    fn test_here_captures_this_file() {
        let failure = Failure::here("boom");
        let location = failure.location.expect("location captured");
        assert!(location.file.ends_with("failure.rs"));
    }

    #[test]
    fn test_from_panic_payload() {
        let static_payload: Box<dyn Any + Send> = Box::new("static message");
        let owned_payload: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other_payload: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(
            Failure::from_panic_payload(static_payload.as_ref()).message,
            "static message"
        );
        assert_eq!(
            Failure::from_panic_payload(owned_payload.as_ref()).message,
            "owned message"
        );
        assert_eq!(
            Failure::from_panic_payload(other_payload.as_ref()).message,
            "panicked with a non-string payload"
        );
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let json = serde_json::to_string(&Failure::new("boom")).unwrap();
        assert_eq!(json, r#"{"message":"boom"}"#);

        let parsed: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Failure::new("boom"));
    }
}

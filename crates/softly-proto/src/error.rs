//! Error types for the Softly framework.
//!
//! These are the fatal errors: misuse of the soft assertion machinery or a
//! broken binding sequence. Collected assertion failures are never reported
//! through this type.

use thiserror::Error;

/// Errors that stop a test immediately instead of being collected.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid use of soft assertions by the test author (abstract provider,
    /// missing default constructor, static field, unsupported executable...).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The integration layer did not follow the bind/rebind/finalize sequence.
    #[error("Internal consistency error: {0}")]
    InternalConsistency(String),

    /// Settings file or environment overrides could not be read.
    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true for errors caused by the test author rather than the framework.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

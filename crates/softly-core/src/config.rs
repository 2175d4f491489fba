//! Settings for how collected failures are reported.
//!
//! Settings come from an optional YAML file and can be overridden with
//! `SOFTLY_*` environment variables:
//!
//! ```yaml
//! report:
//!   heading: "Soft assertion failures"
//!   include_locations: false
//! ```

use serde::{Deserialize, Serialize};
use softly_proto::{Error, Result};
use std::env;
use std::path::Path;

/// Default heading of the aggregate error.
pub const DEFAULT_HEADING: &str = "Multiple Failures";

/// Top level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftlyConfig {
    pub report: ReportConfig,
}

/// Shape of the aggregate error raised at the end of a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Text before the failure count, e.g. `Multiple Failures (3 failures)`.
    pub heading: String,

    /// Append `at file:line:column` to each failure that carries a location.
    pub include_locations: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            heading: DEFAULT_HEADING.to_string(),
            include_locations: true,
        }
    }
}

impl SoftlyConfig {
    /// Parses settings from YAML. Missing keys keep their defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Loads settings from a YAML file, then applies environment overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        tracing::debug!("Loaded soft assertion settings from {}", path.display());
        config.with_env_overrides()
    }

    /// Default settings with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Applies `SOFTLY_HEADING` and `SOFTLY_INCLUDE_LOCATIONS`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(heading) = lookup("SOFTLY_HEADING")
            && !heading.trim().is_empty()
        {
            self.report.heading = heading;
        }

        if let Some(raw) = lookup("SOFTLY_INCLUDE_LOCATIONS") {
            self.report.include_locations = parse_flag("SOFTLY_INCLUDE_LOCATIONS", &raw)?;
        }

        Ok(self)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "{key} must be a boolean flag, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SoftlyConfig::default();
        assert_eq!(config.report.heading, "Multiple Failures");
        assert!(config.report.include_locations);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = SoftlyConfig::from_yaml("report:\n  include_locations: false\n").unwrap();
        assert_eq!(config.report.heading, DEFAULT_HEADING);
        assert!(!config.report.include_locations);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let err = SoftlyConfig::from_yaml("report: [not, a, map]").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("softly.yml");
        std::fs::write(&path, "report:\n  heading: Soft checks\n").unwrap();

        let config = SoftlyConfig::from_file(&path).unwrap();
        assert!(!config.report.heading.is_empty());
        assert_eq!(
            SoftlyConfig::from_yaml(&std::fs::read_to_string(&path).unwrap())
                .unwrap()
                .report
                .heading,
            "Soft checks"
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let err = SoftlyConfig::from_file(&tmp.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let config = SoftlyConfig::default()
            .with_overrides(lookup_from(&[
                ("SOFTLY_HEADING", "Checks"),
                ("SOFTLY_INCLUDE_LOCATIONS", "off"),
            ]))
            .unwrap();

        assert_eq!(config.report.heading, "Checks");
        assert!(!config.report.include_locations);
    }

    #[test]
    fn test_blank_heading_override_is_ignored() {
        let config = SoftlyConfig::default()
            .with_overrides(lookup_from(&[("SOFTLY_HEADING", "  ")]))
            .unwrap();
        assert_eq!(config.report.heading, DEFAULT_HEADING);
    }

    #[test]
    fn test_bad_flag_override() {
        let err = SoftlyConfig::default()
            .with_overrides(lookup_from(&[("SOFTLY_INCLUDE_LOCATIONS", "maybe")]))
            .unwrap_err();
        assert!(err.to_string().contains("SOFTLY_INCLUDE_LOCATIONS"));
    }
}

//! Custom-facts overlay documents.
//!
//! A custom-facts document is externally authored JSON, keyed by server
//! identifier:
//!
//! ```json
//! {
//!   "web-01": {
//!     "custom":    {"application": {"port": 8080, "name": "api"}},
//!     "overrides": {"os": {"name": "debian"}},
//!     "source":    "inventory-v2"
//!   }
//! }
//! ```
//!
//! `custom` entries are namespaced additively into `custom.<category>.<key>`
//! facts; `overrides` replace top-level `<category>.<key>` facts directly.
//! Documents arrive from local files or HTTPS origins; plain-HTTP origins
//! are rejected before any request is made.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CollectError, ValidationError};
use crate::source::FactSource;
use crate::value::Value;

/// One server's custom-facts overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomFacts {
    /// Additive facts, namespaced under `custom.<category>.<key>`.
    #[serde(default)]
    pub custom: BTreeMap<String, Value>,

    /// Direct replacements for top-level `<category>.<key>` facts.
    #[serde(default)]
    pub overrides: BTreeMap<String, Value>,

    /// Free-form label describing where this overlay came from.
    #[serde(default)]
    pub source: String,
}

impl CustomFacts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty() && self.overrides.is_empty()
    }
}

/// The wire format for custom-facts import: server identifier to overlay.
pub type CustomFactsDocument = BTreeMap<String, CustomFacts>;

/// Outcome of validating a custom-facts document.
///
/// Validation is exhaustive: every violation across every server,
/// category, and key is collected rather than failing fast.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// All violations found, in document order.
    pub errors: Vec<ValidationError>,
}

impl ValidationReport {
    /// Returns true if the document had no structural defects.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of violations found.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

fn server_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new("^[A-Za-z0-9_-]+$").expect("static pattern compiles"))
}

/// Validates the structure of a custom-facts document.
///
/// A document is valid iff every server identifier is non-empty and
/// matches `[A-Za-z0-9_-]+`, every category name is non-empty and maps to
/// a key map (not a scalar), and every key within a category is non-empty
/// with a non-null value.
#[must_use]
pub fn validate_document(document: &CustomFactsDocument) -> ValidationReport {
    let mut report = ValidationReport::default();

    for (server, overlay) in document {
        if server.is_empty() {
            report.errors.push(ValidationError::EmptyServerName);
        } else if !server_name_pattern().is_match(server) {
            report.errors.push(ValidationError::InvalidServerName {
                server: server.clone(),
            });
        }

        for (section, tree) in [("custom", &overlay.custom), ("overrides", &overlay.overrides)] {
            validate_section(server, section, tree, &mut report);
        }
    }

    if !report.is_valid() {
        warn!(errors = report.error_count(), "custom-facts document failed validation");
    }
    report
}

fn validate_section(
    server: &str,
    section: &str,
    tree: &BTreeMap<String, Value>,
    report: &mut ValidationReport,
) {
    for (category, entries) in tree {
        if category.is_empty() {
            report.errors.push(ValidationError::EmptyCategoryName {
                server: server.to_string(),
                section: section.to_string(),
            });
            continue;
        }

        let Some(entries) = entries.as_map() else {
            report.errors.push(ValidationError::CategoryNotMap {
                server: server.to_string(),
                section: section.to_string(),
                category: category.clone(),
                type_name: entries.type_name().to_string(),
            });
            continue;
        };

        for (key, value) in entries {
            if key.is_empty() {
                report.errors.push(ValidationError::EmptyCustomKey {
                    server: server.to_string(),
                    section: section.to_string(),
                    category: category.clone(),
                });
            }
            if value.is_null() {
                report.errors.push(ValidationError::NullCustomValue {
                    server: server.to_string(),
                    section: section.to_string(),
                    category: category.clone(),
                    key: key.clone(),
                });
            }
        }
    }
}

/// Returns true if `path` (a flat `category.key` fact path) is selected
/// by `patterns`.
///
/// A path matches a pattern iff the pattern equals the path exactly; OR
/// the pattern is a bare category and the path starts with `category.`;
/// OR the pattern is `*.suffix` and the path ends with `.suffix`; OR the
/// pattern is `category.*` and the path starts with `category.`. An empty
/// pattern list selects everything.
#[must_use]
pub fn selection_matches(patterns: &[String], path: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|pattern| pattern_matches(pattern, path))
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return path.ends_with(&format!(".{suffix}"));
    }
    if let Some(category) = pattern.strip_suffix(".*") {
        return path.starts_with(&format!("{category}."));
    }
    if !pattern.contains('.') && !pattern.contains('*') {
        return path.starts_with(&format!("{pattern}."));
    }
    false
}

/// Where a custom-facts document is loaded from.
///
/// Network origins are HTTPS-only: `http://` locations are rejected at
/// parse time, before any request is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomFactsSource {
    /// A JSON document on the local filesystem.
    File(PathBuf),
    /// A JSON document fetched from an `https://` origin.
    Https(String),
}

impl CustomFactsSource {
    /// Classifies a location string into a source.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InsecureUrl`] for `http://` locations.
    pub fn parse(location: &str) -> Result<Self, ValidationError> {
        if location.starts_with("https://") {
            return Ok(Self::Https(location.to_string()));
        }
        if location.starts_with("http://") {
            return Err(ValidationError::InsecureUrl {
                url: location.to_string(),
            });
        }
        Ok(Self::File(PathBuf::from(location)))
    }

    /// Loads and parses the document.
    ///
    /// # Errors
    ///
    /// Returns a [`CollectError`] when the file cannot be read, the fetch
    /// fails, or the payload is not a valid custom-facts document.
    pub fn load(&self, timeout: Duration) -> Result<CustomFactsDocument, CollectError> {
        match self {
            Self::File(path) => {
                let location = path.display().to_string();
                let raw = std::fs::read_to_string(path).map_err(|source| CollectError::Io {
                    location: location.clone(),
                    source,
                })?;
                let document: CustomFactsDocument =
                    serde_json::from_str(&raw).map_err(|e| CollectError::MalformedDocument {
                        location,
                        reason: e.to_string(),
                    })?;
                debug!(path = %path.display(), servers = document.len(), "loaded custom-facts file");
                Ok(document)
            }
            Self::Https(url) => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(timeout)
                    .build()
                    .map_err(|e| CollectError::Fetch {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                let response = client
                    .get(url)
                    .send()
                    .and_then(reqwest::blocking::Response::error_for_status)
                    .map_err(|e| CollectError::Fetch {
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                let document: CustomFactsDocument =
                    response.json().map_err(|e| CollectError::MalformedDocument {
                        location: url.clone(),
                        reason: e.to_string(),
                    })?;
                debug!(%url, servers = document.len(), "fetched custom-facts document");
                Ok(document)
            }
        }
    }

    /// The source tag facts from this document should carry.
    #[must_use]
    pub const fn fact_source(&self) -> FactSource {
        FactSource::Custom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_from(json: serde_json::Value) -> CustomFactsDocument {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_valid_document() {
        let document = document_from(serde_json::json!({
            "web-01": {
                "custom": {"application": {"port": 8080}},
                "overrides": {"os": {"name": "debian"}},
                "source": "inventory"
            }
        }));

        let report = validate_document(&document);
        assert!(report.is_valid());
        assert_eq!(report.error_count(), 0);
    }

    #[test]
    fn test_validation_is_exhaustive_across_servers() {
        // Two independent defects in two different servers: both reported.
        let document = document_from(serde_json::json!({
            "server-a": {
                "custom": {"": {"port": 8080}}
            },
            "server-b": {
                "custom": {"application": {"port": null}}
            }
        }));

        let report = validate_document(&document);
        assert!(!report.is_valid());
        assert_eq!(report.error_count(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::EmptyCategoryName { server, .. } if server == "server-a")));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::NullCustomValue { server, .. } if server == "server-b")));
    }

    #[test]
    fn test_validation_rejects_bad_server_names() {
        let document = document_from(serde_json::json!({
            "web 01": {"custom": {}},
            "": {"custom": {}}
        }));

        let report = validate_document(&document);
        assert_eq!(report.error_count(), 2);
    }

    #[test]
    fn test_validation_rejects_scalar_category() {
        let document = document_from(serde_json::json!({
            "web-01": {"overrides": {"os": "debian"}}
        }));

        let report = validate_document(&document);
        assert_eq!(report.error_count(), 1);
        assert!(matches!(
            &report.errors[0],
            ValidationError::CategoryNotMap { section, type_name, .. }
                if section == "overrides" && type_name == "string"
        ));
    }

    #[test]
    fn test_validation_rejects_empty_key() {
        let document = document_from(serde_json::json!({
            "web-01": {"custom": {"application": {"": 1}}}
        }));

        let report = validate_document(&document);
        assert_eq!(report.error_count(), 1);
        assert!(matches!(
            &report.errors[0],
            ValidationError::EmptyCustomKey { category, .. } if category == "application"
        ));
    }

    #[test]
    fn test_selection_exact_match() {
        let patterns = vec!["application.name".to_string()];
        assert!(selection_matches(&patterns, "application.name"));
        assert!(!selection_matches(&patterns, "application.port"));
    }

    #[test]
    fn test_selection_bare_category() {
        let patterns = vec!["application".to_string()];
        assert!(selection_matches(&patterns, "application.port"));
        assert!(selection_matches(&patterns, "application.version"));
        assert!(!selection_matches(&patterns, "monitoring.port"));
    }

    #[test]
    fn test_selection_suffix_wildcard() {
        let patterns = vec!["*.port".to_string()];
        assert!(selection_matches(&patterns, "application.port"));
        assert!(selection_matches(&patterns, "monitoring.port"));
        assert!(!selection_matches(&patterns, "application.version"));
    }

    #[test]
    fn test_selection_category_wildcard() {
        let patterns = vec!["application.*".to_string()];
        assert!(selection_matches(&patterns, "application.port"));
        assert!(!selection_matches(&patterns, "monitoring.port"));
    }

    #[test]
    fn test_selection_empty_patterns_select_everything() {
        assert!(selection_matches(&[], "anything.at_all"));
    }

    #[test]
    fn test_source_parse_rejects_plain_http() {
        let err = CustomFactsSource::parse("http://inventory.example.com/facts.json").unwrap_err();
        assert!(matches!(err, ValidationError::InsecureUrl { .. }));
    }

    #[test]
    fn test_source_parse_accepts_https_and_files() {
        assert_eq!(
            CustomFactsSource::parse("https://inventory.example.com/facts.json").unwrap(),
            CustomFactsSource::Https("https://inventory.example.com/facts.json".to_string())
        );
        assert_eq!(
            CustomFactsSource::parse("/etc/fleet/custom.json").unwrap(),
            CustomFactsSource::File(PathBuf::from("/etc/fleet/custom.json"))
        );
    }

    #[test]
    fn test_source_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(
            &path,
            r#"{"web-01": {"custom": {"application": {"port": 8080}}, "source": "file"}}"#,
        )
        .unwrap();

        let source = CustomFactsSource::File(path);
        let document = source.load(Duration::from_secs(5)).unwrap();
        assert_eq!(document.len(), 1);
        assert_eq!(document["web-01"].source, "file");
    }

    #[test]
    fn test_source_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = CustomFactsSource::File(path)
            .load(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CollectError::MalformedDocument { .. }));
    }

    #[test]
    fn test_source_load_missing_file() {
        let err = CustomFactsSource::File(PathBuf::from("/nonexistent/custom.json"))
            .load(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, CollectError::Io { .. }));
    }
}

//! Document-backed collectors.
//!
//! A document collector extracts facts from a JSON document, either a
//! flat map of per-server sections or an array of tagged entries. The
//! document lives on the local filesystem or behind an `https://` origin;
//! plain-HTTP origins are rejected before any request is made.
//!
//! Static-configuration and infrastructure-state extraction are the two
//! pre-wired shapes of this collector, emitting facts under the
//! `config.` and `infra.` prefixes respectively.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::collector::Collector;
use crate::error::{CollectError, ValidationError};
use crate::fact::FactCollection;
use crate::merge::{merge_collections, MergePolicy};
use crate::source::FactSource;
use crate::value::Value;

/// Flat-section key holding defaults applied to every server.
const DEFAULTS_SECTION: &str = "defaults";

/// Array-entry keys identifying which server an entry describes.
const IDENTITY_KEYS: [&str; 2] = ["server", "name"];

/// How a document maps onto servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// An object of per-server sections, with an optional `defaults`
    /// section merged beneath each server's own.
    Flat,
    /// An array of objects, each tagged with a `server` (or `name`)
    /// field naming the machine it describes.
    Array,
}

impl DocumentFormat {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Array => "array",
        }
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "array" => Ok(Self::Array),
            other => Err(ValidationError::UnknownDocumentFormat {
                format: other.to_string(),
            }),
        }
    }
}

/// Where a document lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentLocation {
    File(PathBuf),
    Https(String),
}

impl DocumentLocation {
    /// Classifies a location string.
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

    /// Eagerly checks that a file location is reachable.
    ///
    /// HTTPS locations are only checked for their scheme; reachability is
    /// a collection-time concern there.
    pub fn check_reachable(&self) -> Result<(), ValidationError> {
        match self {
            Self::File(path) if !path.is_file() => Err(ValidationError::UnreachableFile {
                path: path.display().to_string(),
                reason: "no such file".to_string(),
            }),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Https(url) => url.clone(),
        }
    }

    fn fetch(&self, timeout: Duration) -> Result<serde_json::Value, CollectError> {
        match self {
            Self::File(path) => {
                let location = path.display().to_string();
                let raw = std::fs::read_to_string(path).map_err(|source| CollectError::Io {
                    location: location.clone(),
                    source,
                })?;
                serde_json::from_str(&raw).map_err(|e| CollectError::MalformedDocument {
                    location,
                    reason: e.to_string(),
                })
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
                response.json().map_err(|e| CollectError::MalformedDocument {
                    location: url.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Extracts facts for a server from a flat or array JSON document.
#[derive(Debug)]
pub struct DocumentCollector {
    source: FactSource,
    location: DocumentLocation,
    format: DocumentFormat,
    key_prefix: Option<String>,
    timeout: Duration,
    merge_policy: MergePolicy,
    ttl_secs: u64,
}

impl DocumentCollector {
    /// Creates a collector over an already-parsed location.
    #[must_use]
    pub fn new(
        source: FactSource,
        location: DocumentLocation,
        format: DocumentFormat,
        key_prefix: Option<String>,
        timeout: Duration,
        merge_policy: MergePolicy,
        ttl_secs: u64,
    ) -> Self {
        Self {
            source,
            location,
            format,
            key_prefix,
            timeout,
            merge_policy,
            ttl_secs,
        }
    }

    /// Static-configuration extraction: flat document, `config.` facts.
    ///
    /// # Errors
    ///
    /// Fails eagerly if the file does not exist.
    pub fn static_config(path: impl AsRef<Path>, ttl_secs: u64) -> Result<Self, ValidationError> {
        let location = DocumentLocation::File(path.as_ref().to_path_buf());
        location.check_reachable()?;
        Ok(Self::new(
            FactSource::StaticConfig,
            location,
            DocumentFormat::Flat,
            Some("config".to_string()),
            Duration::from_secs(30),
            MergePolicy::Replace,
            ttl_secs,
        ))
    }

    /// Infrastructure-state extraction: array document, `infra.` facts.
    ///
    /// # Errors
    ///
    /// Fails eagerly if the file does not exist.
    pub fn infra_state(path: impl AsRef<Path>, ttl_secs: u64) -> Result<Self, ValidationError> {
        let location = DocumentLocation::File(path.as_ref().to_path_buf());
        location.check_reachable()?;
        Ok(Self::new(
            FactSource::InfraState,
            location,
            DocumentFormat::Array,
            Some("infra".to_string()),
            Duration::from_secs(30),
            MergePolicy::Replace,
            ttl_secs,
        ))
    }

    fn prefixed(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) if !key.starts_with(&format!("{prefix}.")) => format!("{prefix}.{key}"),
            _ => key.to_string(),
        }
    }

    fn frame_section(&self, server: &str, section: &Value) -> FactCollection {
        let mut collection = FactCollection::new(server);
        let Some(entries) = section.as_map() else {
            return collection;
        };
        for (key, value) in entries {
            if IDENTITY_KEYS.contains(&key.as_str()) {
                continue;
            }
            collection.insert_value(self.prefixed(key), value.clone(), self.source, self.ttl_secs);
        }
        collection
    }

    fn collect_flat(&self, server: &str, document: &Value) -> Result<FactCollection, CollectError> {
        let location = self.location.describe();
        let Some(sections) = document.as_map() else {
            return Err(CollectError::MalformedDocument {
                location,
                reason: format!("flat document must be an object, got {}", document.type_name()),
            });
        };

        let defaults = sections.get(DEFAULTS_SECTION);
        let own = sections.get(server);
        if defaults.is_none() && own.is_none() {
            return Err(CollectError::UnknownServer {
                source: self.source,
                server: server.to_string(),
            });
        }

        let mut collection = defaults
            .map(|section| self.frame_section(server, section))
            .unwrap_or_else(|| FactCollection::new(server));
        if let Some(section) = own {
            let specific = self.frame_section(server, section);
            collection = merge_collections(&collection, &specific, self.merge_policy);
        }
        Ok(collection)
    }

    fn collect_array(&self, server: &str, document: &Value) -> Result<FactCollection, CollectError> {
        let location = self.location.describe();
        let Some(entries) = document.as_list() else {
            return Err(CollectError::MalformedDocument {
                location,
                reason: format!("array document must be a list, got {}", document.type_name()),
            });
        };

        let mut matched: Option<FactCollection> = None;
        for entry in entries {
            let Some(fields) = entry.as_map() else {
                continue;
            };
            let is_ours = IDENTITY_KEYS.iter().any(|id| {
                fields.get(*id).and_then(Value::as_string) == Some(server)
            });
            if !is_ours {
                continue;
            }

            let framed = self.frame_section(server, entry);
            matched = Some(match matched {
                None => framed,
                Some(held) => merge_collections(&held, &framed, self.merge_policy),
            });
        }

        matched.ok_or_else(|| CollectError::UnknownServer {
            source: self.source,
            server: server.to_string(),
        })
    }
}

impl Collector for DocumentCollector {
    fn source(&self) -> FactSource {
        self.source
    }

    fn collect(&self, server: &str) -> Result<FactCollection, CollectError> {
        let document = Value::from(self.location.fetch(self.timeout)?);
        let collection = match self.format {
            DocumentFormat::Flat => self.collect_flat(server, &document),
            DocumentFormat::Array => self.collect_array(server, &document),
        }?;
        debug!(
            source = %self.source,
            server,
            location = %self.location.describe(),
            facts = collection.len(),
            "document extracted"
        );
        Ok(collection)
    }
}

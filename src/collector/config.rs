//! Source configuration and the collector factory.
//!
//! Configuration problems are *invalid-source* errors: empty type,
//! non-positive timeout, unknown merge policy, unreachable file. All of
//! them are detected eagerly here, at construction, never silently
//! ignored at collection time.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::collector::document::{DocumentCollector, DocumentFormat, DocumentLocation};
use crate::collector::exec::{LocalCollector, RemoteExecCollector};
use crate::collector::noop::NoopCollector;
use crate::collector::provider::FactProvider;
use crate::collector::Collector;
use crate::error::ValidationError;
use crate::merge::MergePolicy;
use crate::source::FactSource;

const DEFAULT_TIMEOUT_SECS: i64 = 30;

fn default_timeout_secs() -> i64 {
    DEFAULT_TIMEOUT_SECS
}

/// Declarative configuration for one collector slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Which source this slot feeds (`remote_exec`, `local`, ...).
    pub source_type: String,

    /// Document location for document-backed sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Document format (`flat` or `array`) for document-backed sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Collection timeout in seconds; must be positive.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,

    /// Merge policy for document-backed sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_policy: Option<String>,

    /// TTL stamped on collected facts; zero means never expire.
    #[serde(default)]
    pub ttl_secs: u64,
}

impl SourceConfig {
    /// Minimal configuration for a source type.
    #[must_use]
    pub fn new(source_type: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            location: None,
            format: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            merge_policy: None,
            ttl_secs: 0,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

fn document_prefix(source: FactSource) -> Option<String> {
    match source {
        FactSource::StaticConfig => Some("config".to_string()),
        FactSource::InfraState => Some("infra".to_string()),
        FactSource::Custom => Some("custom".to_string()),
        _ => None,
    }
}

const fn default_format(source: FactSource) -> DocumentFormat {
    match source {
        FactSource::InfraState => DocumentFormat::Array,
        _ => DocumentFormat::Flat,
    }
}

/// Builds a collector from its configuration.
///
/// Provider-backed sources (`remote_exec`, `local`) need `provider`;
/// document-backed sources need a location. The `storage` slot, and a
/// `custom` slot without a location, build as [`NoopCollector`]s.
///
/// # Errors
///
/// Every *invalid-source* condition is reported here: empty or unknown
/// source type, non-positive timeout, unknown merge policy or format,
/// insecure URL, unreachable file, missing location or provider.
pub fn build_collector(
    config: &SourceConfig,
    provider: Option<Arc<dyn FactProvider>>,
) -> Result<Arc<dyn Collector>, ValidationError> {
    let source: FactSource = config.source_type.parse()?;

    if config.timeout_secs <= 0 {
        return Err(ValidationError::NonPositiveTimeout {
            timeout_secs: config.timeout_secs,
        });
    }
    let timeout = Duration::from_secs(config.timeout_secs.unsigned_abs());

    let merge_policy = match &config.merge_policy {
        Some(raw) => raw.parse::<MergePolicy>()?,
        None => MergePolicy::Replace,
    };

    let format = match &config.format {
        Some(raw) => raw.parse::<DocumentFormat>()?,
        None => default_format(source),
    };

    let collector: Arc<dyn Collector> = match source {
        FactSource::RemoteExec => {
            let provider = provider.ok_or_else(|| ValidationError::MissingProvider {
                source_type: config.source_type.clone(),
            })?;
            Arc::new(RemoteExecCollector::new(provider, config.ttl_secs))
        }
        FactSource::Local => {
            let provider = provider.ok_or_else(|| ValidationError::MissingProvider {
                source_type: config.source_type.clone(),
            })?;
            Arc::new(LocalCollector::new(provider, config.ttl_secs))
        }
        FactSource::StaticConfig | FactSource::InfraState => {
            let raw = config.location.as_ref().ok_or_else(|| {
                ValidationError::MissingLocation {
                    source_type: config.source_type.clone(),
                }
            })?;
            let location = DocumentLocation::parse(raw)?;
            location.check_reachable()?;
            Arc::new(DocumentCollector::new(
                source,
                location,
                format,
                document_prefix(source),
                timeout,
                merge_policy,
                config.ttl_secs,
            ))
        }
        FactSource::Custom => match &config.location {
            Some(raw) => {
                let location = DocumentLocation::parse(raw)?;
                location.check_reachable()?;
                Arc::new(DocumentCollector::new(
                    source,
                    location,
                    format,
                    document_prefix(source),
                    timeout,
                    merge_policy,
                    config.ttl_secs,
                ))
            }
            None => Arc::new(NoopCollector::new(source)),
        },
        FactSource::Storage => Arc::new(NoopCollector::new(source)),
    };

    info!(source = %source, "collector built");
    Ok(collector)
}

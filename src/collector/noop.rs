//! Stub collector.
//!
//! Stands in for a source that is configured but intentionally inert,
//! e.g. a custom-facts slot before any overlay has been imported.

use crate::collector::Collector;
use crate::error::CollectError;
use crate::fact::FactCollection;
use crate::source::FactSource;

/// A collector that knows nothing.
///
/// `collect` returns an empty, non-nil collection; any specific key
/// request fails with [`CollectError::UnsupportedKey`].
#[derive(Debug, Clone, Copy)]
pub struct NoopCollector {
    source: FactSource,
}

impl NoopCollector {
    #[must_use]
    pub const fn new(source: FactSource) -> Self {
        Self { source }
    }
}

impl Collector for NoopCollector {
    fn source(&self) -> FactSource {
        self.source
    }

    fn collect(&self, server: &str) -> Result<FactCollection, CollectError> {
        Ok(FactCollection::new(server))
    }
}

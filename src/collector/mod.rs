//! Source collectors.
//!
//! A collector is a capability that, given a machine identifier, produces
//! a [`FactCollection`], a filtered collection for requested keys, or a
//! single fact. Collectors are stateless aside from configuration
//! (document location, timeout, merge policy); they never share mutable
//! state with the manager.
//!
//! The mechanics of obtaining raw values from a machine (running remote
//! commands, querying the local OS) live behind the narrow
//! [`FactProvider`] contract; everything else here is routing, framing,
//! and document extraction.

mod config;
mod document;
mod exec;
mod noop;
mod provider;

pub use config::{build_collector, SourceConfig};
pub use document::{DocumentCollector, DocumentFormat, DocumentLocation};
pub use exec::{LocalCollector, RemoteExecCollector};
pub use noop::NoopCollector;
pub use provider::{FactProvider, ProviderError, StaticProvider};

use crate::error::CollectError;
use crate::fact::{Fact, FactCollection};
use crate::source::FactSource;

/// The collector capability.
///
/// Implementations must be safe to call with an empty key list (returning
/// an empty, non-nil collection) and must fail with a typed
/// [`CollectError::UnsupportedKey`] for unknown keys rather than
/// returning a partial success.
pub trait Collector: Send + Sync + std::fmt::Debug {
    /// The source this collector's facts are tagged with.
    fn source(&self) -> FactSource;

    /// Collects every fact this source knows about `server`.
    fn collect(&self, server: &str) -> Result<FactCollection, CollectError>;

    /// Collects only the requested keys.
    ///
    /// The default implementation collects everything and filters; a key
    /// the source does not know fails the whole call.
    fn collect_specific(
        &self,
        server: &str,
        keys: &[String],
    ) -> Result<FactCollection, CollectError> {
        if keys.is_empty() {
            return Ok(FactCollection::new(server));
        }

        let full = self.collect(server)?;
        let mut filtered = FactCollection::new(server);
        for key in keys {
            match full.get(key) {
                Some(fact) => filtered.insert(fact.clone()),
                None => {
                    return Err(CollectError::UnsupportedKey {
                        source: self.source(),
                        key: key.clone(),
                    })
                }
            }
        }
        Ok(filtered)
    }

    /// Collects a single fact.
    fn get_fact(&self, server: &str, key: &str) -> Result<Fact, CollectError> {
        let keys = [key.to_string()];
        let mut collection = self.collect_specific(server, &keys)?;
        collection.remove(key).ok_or_else(|| CollectError::UnsupportedKey {
            source: self.source(),
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe.
    fn _assert_collector_object_safe(_: &dyn Collector) {}

    #[derive(Debug)]
    struct TwoKeyCollector;

    impl Collector for TwoKeyCollector {
        fn source(&self) -> FactSource {
            FactSource::Local
        }

        fn collect(&self, server: &str) -> Result<FactCollection, CollectError> {
            let mut collection = FactCollection::new(server);
            collection.insert_value("os.name", "linux", FactSource::Local, 0);
            collection.insert_value("cpu.cores", 8i64, FactSource::Local, 0);
            Ok(collection)
        }
    }

    #[test]
    fn test_default_collect_specific_empty_keys() {
        let collection = TwoKeyCollector.collect_specific("web-01", &[]).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.server, "web-01");
    }

    #[test]
    fn test_default_collect_specific_filters() {
        let keys = vec!["os.name".to_string()];
        let collection = TwoKeyCollector.collect_specific("web-01", &keys).unwrap();
        assert_eq!(collection.keys(), vec!["os.name"]);
    }

    #[test]
    fn test_default_collect_specific_unknown_key_is_typed_error() {
        let keys = vec!["os.name".to_string(), "disk.total".to_string()];
        let err = TwoKeyCollector.collect_specific("web-01", &keys).unwrap_err();
        assert!(matches!(
            err,
            CollectError::UnsupportedKey { key, .. } if key == "disk.total"
        ));
    }

    #[test]
    fn test_default_get_fact() {
        let fact = TwoKeyCollector.get_fact("web-01", "cpu.cores").unwrap();
        assert_eq!(fact.value.as_int(), Some(8));

        let err = TwoKeyCollector.get_fact("web-01", "missing").unwrap_err();
        assert!(matches!(err, CollectError::UnsupportedKey { .. }));
    }
}

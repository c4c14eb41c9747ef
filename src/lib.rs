//! # fleetfacts - fact reconciliation for machine fleets
//!
//! fleetfacts gathers typed, timestamped attributes ("facts") about
//! remote or local machines from heterogeneous sources, reconciles
//! conflicting values under configurable policies, caches them with
//! expiration, and persists a durable per-machine snapshot that can be
//! queried, exported, and re-imported.
//!
//! ## Core Concepts
//!
//! - **Fact**: a typed value with provenance and expiration
//! - **FactCollection**: a named, timestamped bag of facts for one machine
//! - **Collector**: a capability producing facts from one specific source
//! - **MachineFacts**: the durable record for one machine, keyed by machine ID
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fleetfacts::{FactsManager, ManagerConfig, LocalCollector, StaticProvider};
//!
//! let provider = Arc::new(
//!     StaticProvider::new()
//!         .with("web-01", "hostname", "web-01.fleet")
//!         .with("web-01", "cpu.cores", 8i64),
//! );
//! let manager = FactsManager::new(ManagerConfig::default())
//!     .with_collector(Arc::new(LocalCollector::new(provider, 300)));
//!
//! let outcome = manager.collect_all_facts("web-01")?;
//! assert_eq!(outcome.facts.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod fact;
pub mod source;
pub mod value;

// Reconciliation
pub mod classify;
pub mod custom;
pub mod merge;

// Runtime
pub mod cache;
pub mod collector;
pub mod manager;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use cache::FactCache;
pub use collector::{
    build_collector, Collector, DocumentCollector, DocumentFormat, FactProvider, LocalCollector,
    NoopCollector, ProviderError, RemoteExecCollector, SourceConfig, StaticProvider,
};
pub use custom::{
    selection_matches, validate_document, CustomFacts, CustomFactsDocument, CustomFactsSource,
    ValidationReport,
};
pub use error::{CollectError, FactsError, FactsResult, SourceFailure, ValidationError};
pub use fact::{Fact, FactBuilder, FactCollection};
pub use manager::{
    derive_machine_id, CollectOutcome, FactsManager, ImportOptions, ImportReport, ManagerConfig,
    LOCAL_SERVER,
};
pub use merge::MergePolicy;
pub use source::FactSource;
pub use storage::{
    CpuInfo, FactQuery, FactStorage, JsonStore, KvConfig, KvStore, MachineFacts, MemoryInfo,
    StorageError,
};
pub use value::Value;

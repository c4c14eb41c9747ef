//! Source and provenance types.
//!
//! Every fact carries the source it was collected from. Provenance drives
//! source routing in the manager and conflict diagnostics in the merge
//! engine, and it survives persistence so that stored records can be
//! traced back to the collector that produced them.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// The source a fact was collected from.
///
/// # Examples
///
/// ```
/// use fleetfacts::FactSource;
///
/// let source: FactSource = "remote_exec".parse().unwrap();
/// assert_eq!(source, FactSource::RemoteExec);
/// assert_eq!(source.as_str(), "remote_exec");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactSource {
    /// Command execution on a remote machine.
    RemoteExec,
    /// Queries against the local operating system.
    Local,
    /// Extraction from a static configuration document.
    StaticConfig,
    /// Extraction from an infrastructure-state document.
    InfraState,
    /// Externally authored custom facts and overrides.
    Custom,
    /// Synthetic facts rehydrated from persistent storage.
    Storage,
}

impl FactSource {
    /// All sources a manager can route to, in deterministic order.
    pub const ALL: [Self; 6] = [
        Self::RemoteExec,
        Self::Local,
        Self::StaticConfig,
        Self::InfraState,
        Self::Custom,
        Self::Storage,
    ];

    /// Returns the stable string form used in serialized facts and configs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteExec => "remote_exec",
            Self::Local => "local",
            Self::StaticConfig => "static_config",
            Self::InfraState => "infra_state",
            Self::Custom => "custom",
            Self::Storage => "storage",
        }
    }

    /// Returns true for sources that reach over the network.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteExec)
    }
}

impl std::fmt::Display for FactSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for FactSource {}

impl std::str::FromStr for FactSource {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote_exec" => Ok(Self::RemoteExec),
            "local" => Ok(Self::Local),
            "static_config" => Ok(Self::StaticConfig),
            "infra_state" => Ok(Self::InfraState),
            "custom" => Ok(Self::Custom),
            "storage" => Ok(Self::Storage),
            "" => Err(ValidationError::EmptySourceType),
            other => Err(ValidationError::UnknownSourceType {
                source_type: other.to_string(),
            }),
        }
    }
}

//! Import merge policies.
//!
//! Policies are intentionally *pure* (no I/O) so a merge result can be
//! reproduced deterministically given the same fact sets.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Conflict-resolution rule applied when importing facts that collide
/// with existing ones.
///
/// # Examples
///
/// ```
/// use fleetfacts::MergePolicy;
///
/// let policy: MergePolicy = "append".parse().unwrap();
/// assert_eq!(policy, MergePolicy::Append);
/// assert!("latest_gossip".parse::<MergePolicy>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Incoming facts fully overwrite same-key existing facts.
    Replace,

    /// Incoming wins on a strictly newer timestamp, or on an equal
    /// timestamp with strictly more metadata entries; otherwise the
    /// existing fact stays.
    Merge,

    /// Existing facts are never overwritten.
    Skip,

    /// Incoming facts are inserted under a fresh `key_N` suffix, leaving
    /// the existing fact untouched.
    Append,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::Merge
    }
}

impl MergePolicy {
    /// Returns a short stable identifier suitable for logging/debugging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Merge => "merge",
            Self::Skip => "skip",
            Self::Append => "append",
        }
    }
}

impl std::fmt::Display for MergePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for MergePolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "merge" => Ok(Self::Merge),
            "skip" => Ok(Self::Skip),
            "append" => Ok(Self::Append),
            other => Err(ValidationError::UnknownMergePolicy {
                policy: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_roundtrip() {
        for policy in [
            MergePolicy::Replace,
            MergePolicy::Merge,
            MergePolicy::Skip,
            MergePolicy::Append,
        ] {
            let parsed: MergePolicy = policy.name().parse().unwrap();
            assert_eq!(parsed, policy);
        }
    }

    #[test]
    fn test_policy_default_is_merge() {
        assert_eq!(MergePolicy::default(), MergePolicy::Merge);
    }

    #[test]
    fn test_policy_rejects_unknown() {
        let err = "overwrite".parse::<MergePolicy>().unwrap_err();
        match err {
            ValidationError::UnknownMergePolicy { policy } => assert_eq!(policy, "overwrite"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_policy_serde_snake_case() {
        let json = serde_json::to_string(&MergePolicy::Append).unwrap();
        assert_eq!(json, "\"append\"");
    }
}

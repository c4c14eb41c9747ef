//! The durable per-machine record and its query predicate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CPU description inside a [`MachineFacts`] record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuInfo {
    pub cores: u32,
    pub model: String,
    pub arch: String,
    /// Clock frequency in MHz.
    pub frequency: f64,
}

/// Memory description inside a [`MachineFacts`] record, in bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

/// The durable, persisted record for one machine.
///
/// One record per physical or logical machine, keyed by `machineID`.
/// Created on the first successful collect-and-persist, updated in place
/// on every subsequent persist (`updatedAt` refreshed, `createdAt`
/// preserved), and never partially written: a persist replaces the whole
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MachineFacts {
    #[serde(rename = "machineID")]
    pub machine_id: String,
    pub machine_name: String,
    pub action_file: String,
    pub project_name: String,
    pub project_path: String,
    pub hostname: String,
    pub ip_addresses: Vec<String>,
    #[serde(rename = "primaryIP")]
    pub primary_ip: String,
    pub os: String,
    pub os_version: String,
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    #[serde(rename = "systemID")]
    pub system_id: String,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for MachineFacts {
    fn default() -> Self {
        Self {
            machine_id: String::new(),
            machine_name: String::new(),
            action_file: String::new(),
            project_name: String::new(),
            project_path: String::new(),
            hostname: String::new(),
            ip_addresses: Vec::new(),
            primary_ip: String::new(),
            os: String::new(),
            os_version: String::new(),
            cpu: CpuInfo::default(),
            memory: MemoryInfo::default(),
            system_id: String::new(),
            tags: BTreeMap::new(),
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl MachineFacts {
    /// Creates an empty record for a machine ID.
    #[must_use]
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            ..Self::default()
        }
    }

    /// The tag conventionally holding the machine's environment.
    pub const ENVIRONMENT_TAG: &'static str = "environment";

    /// Returns the environment tag value, if set.
    #[must_use]
    pub fn environment(&self) -> Option<&str> {
        self.tags.get(Self::ENVIRONMENT_TAG).map(String::as_str)
    }
}

/// A conjunctive predicate over persisted [`MachineFacts`] records.
///
/// A record matches iff *every specified* field matches; empty or unset
/// fields are wildcards. Used only for read/delete against storage,
/// never persisted itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactQuery {
    pub machine_name: Option<String>,
    pub action_file: Option<String>,
    pub project_name: Option<String>,
    /// Every listed tag must match exactly; an unmatched tag key fails
    /// the whole record.
    pub tags: BTreeMap<String, String>,
    pub os: Option<String>,
    /// Sugar for `tags["environment"]`.
    pub environment: Option<String>,
    /// Matches records with `updatedAt <= updated_before`.
    pub updated_before: Option<DateTime<Utc>>,
    /// Matches records with `updatedAt >= updated_after`.
    pub updated_after: Option<DateTime<Utc>>,
    /// If positive, caps `query` results; never applies to `delete`.
    pub limit: usize,
}

impl FactQuery {
    /// A query matching every record.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_machine_name(mut self, name: impl Into<String>) -> Self {
        self.machine_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Conjunctive match against one record.
    #[must_use]
    pub fn matches(&self, record: &MachineFacts) -> bool {
        if let Some(name) = &self.machine_name {
            if &record.machine_name != name {
                return false;
            }
        }
        if let Some(action_file) = &self.action_file {
            if &record.action_file != action_file {
                return false;
            }
        }
        if let Some(project_name) = &self.project_name {
            if &record.project_name != project_name {
                return false;
            }
        }
        if let Some(os) = &self.os {
            if &record.os != os {
                return false;
            }
        }
        for (key, want) in &self.tags {
            if record.tags.get(key) != Some(want) {
                return false;
            }
        }
        if let Some(environment) = &self.environment {
            if record.environment() != Some(environment.as_str()) {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if record.updated_at > before {
                return false;
            }
        }
        if let Some(after) = self.updated_after {
            if record.updated_at < after {
                return false;
            }
        }
        true
    }
}

//! Static classification of fact keys into originating sources.
//!
//! Routing is by set/prefix membership only; nothing here inspects
//! values. A key matching no category is simply not collected (silently
//! absent from the result), never an error.

use std::collections::BTreeSet;

use crate::source::FactSource;

/// System identity keys, probeable remotely or locally.
pub const SYSTEM_KEYS: &[&str] = &["machine_id", "machine_name", "hostname", "system_id"];

/// Operating-system keys.
pub const OS_KEYS: &[&str] = &["os.name", "os.version", "os.arch", "kernel.version"];

/// Hardware keys.
pub const HARDWARE_KEYS: &[&str] = &[
    "cpu.cores",
    "cpu.model",
    "cpu.arch",
    "cpu.frequency",
    "memory.total",
    "memory.used",
    "memory.available",
];

/// Network keys.
pub const NETWORK_KEYS: &[&str] = &["network.ips", "network.primary_ip", "network.interfaces"];

/// Environment-variable keys live under this prefix.
pub const ENVIRONMENT_PREFIX: &str = "env.";

/// Reserved prefix for static-configuration extraction.
pub const CONFIG_PREFIX: &str = "config.";

/// Reserved prefix for infrastructure-state extraction.
pub const INFRA_PREFIX: &str = "infra.";

/// Reserved prefix for custom-facts overlays.
pub const CUSTOM_PREFIX: &str = "custom.";

/// Returns true for keys answerable by probing the machine itself.
fn is_machine_key(key: &str) -> bool {
    SYSTEM_KEYS.contains(&key)
        || OS_KEYS.contains(&key)
        || HARDWARE_KEYS.contains(&key)
        || NETWORK_KEYS.contains(&key)
        || key.starts_with(ENVIRONMENT_PREFIX)
}

/// Classifies one key into zero or more source categories.
#[must_use]
pub fn classify_key(key: &str) -> Vec<FactSource> {
    if is_machine_key(key) {
        return vec![FactSource::RemoteExec, FactSource::Local];
    }
    if key.starts_with(CONFIG_PREFIX) {
        return vec![FactSource::StaticConfig];
    }
    if key.starts_with(INFRA_PREFIX) {
        return vec![FactSource::InfraState];
    }
    if key.starts_with(CUSTOM_PREFIX) {
        return vec![FactSource::Custom];
    }
    Vec::new()
}

/// Union of sources implicated by all requested keys, in deterministic
/// (enum) order.
#[must_use]
pub fn classify_keys(keys: &[String]) -> BTreeSet<FactSource> {
    keys.iter()
        .flat_map(|key| classify_key(key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_keys_route_to_exec_and_local() {
        for key in ["hostname", "os.name", "cpu.cores", "network.ips", "env.PATH"] {
            assert_eq!(
                classify_key(key),
                vec![FactSource::RemoteExec, FactSource::Local],
                "key {key}"
            );
        }
    }

    #[test]
    fn test_reserved_prefixes() {
        assert_eq!(classify_key("config.deploy.user"), vec![FactSource::StaticConfig]);
        assert_eq!(classify_key("infra.region"), vec![FactSource::InfraState]);
        assert_eq!(classify_key("custom.application.port"), vec![FactSource::Custom]);
    }

    #[test]
    fn test_unmatched_key_classifies_to_nothing() {
        assert!(classify_key("nonsense").is_empty());
        assert!(classify_key("osname").is_empty()); // no prefix tricks
        assert!(classify_key("config").is_empty()); // bare prefix without dot
    }

    #[test]
    fn test_classify_keys_unions_sources() {
        let keys: Vec<String> = ["cpu.cores", "config.deploy.user", "unknown"]
            .iter()
            .map(|s| (*s).to_string())
            .collect();

        let sources: Vec<_> = classify_keys(&keys).into_iter().collect();
        assert_eq!(
            sources,
            vec![FactSource::RemoteExec, FactSource::Local, FactSource::StaticConfig]
        );
    }

    #[test]
    fn test_classify_keys_empty_request() {
        assert!(classify_keys(&[]).is_empty());
    }
}

//! Converters between the ephemeral and durable representations.
//!
//! FactCollection -> MachineFacts runs through a static registry of
//! per-key setters, one per well-known flat key. Each setter type-checks
//! the dynamic value before assignment; unknown keys are ignored, never
//! an error. The inverse emits one synthetic fact per populated field,
//! sourced as `storage`.

use crate::fact::FactCollection;
use crate::source::FactSource;
use crate::storage::machine::MachineFacts;
use crate::value::Value;

/// A typed setter for one well-known fact key.
///
/// Returns true iff the value had the expected type and was assigned.
type Setter = fn(&Value, &mut MachineFacts) -> bool;

/// Prefix for free-form tag facts (`tags.role`, `tags.environment`, ...).
const TAGS_PREFIX: &str = "tags.";

macro_rules! string_setter {
    ($name:ident, $($field:ident).+) => {
        fn $name(value: &Value, record: &mut MachineFacts) -> bool {
            match value.as_string() {
                Some(s) => {
                    record.$($field).+ = s.to_string();
                    true
                }
                None => false,
            }
        }
    };
}

string_setter!(set_machine_id, machine_id);
string_setter!(set_machine_name, machine_name);
string_setter!(set_hostname, hostname);
string_setter!(set_system_id, system_id);
string_setter!(set_action_file, action_file);
string_setter!(set_project_name, project_name);
string_setter!(set_project_path, project_path);
string_setter!(set_os_name, os);
string_setter!(set_os_version, os_version);
string_setter!(set_cpu_model, cpu.model);
string_setter!(set_cpu_arch, cpu.arch);

fn set_cpu_cores(value: &Value, record: &mut MachineFacts) -> bool {
    match value.as_int().and_then(|n| u32::try_from(n).ok()) {
        Some(cores) => {
            record.cpu.cores = cores;
            true
        }
        None => false,
    }
}

fn set_cpu_frequency(value: &Value, record: &mut MachineFacts) -> bool {
    match value.as_float() {
        Some(frequency) if frequency >= 0.0 => {
            record.cpu.frequency = frequency;
            true
        }
        _ => false,
    }
}

fn memory_setter(value: &Value) -> Option<u64> {
    value.as_int().and_then(|n| u64::try_from(n).ok())
}

fn set_memory_total(value: &Value, record: &mut MachineFacts) -> bool {
    match memory_setter(value) {
        Some(bytes) => {
            record.memory.total = bytes;
            true
        }
        None => false,
    }
}

fn set_memory_used(value: &Value, record: &mut MachineFacts) -> bool {
    match memory_setter(value) {
        Some(bytes) => {
            record.memory.used = bytes;
            true
        }
        None => false,
    }
}

fn set_memory_available(value: &Value, record: &mut MachineFacts) -> bool {
    match memory_setter(value) {
        Some(bytes) => {
            record.memory.available = bytes;
            true
        }
        None => false,
    }
}

/// Returns true for loopback-ish addresses that make poor primary IPs.
fn is_loopback(address: &str) -> bool {
    address.starts_with("127.") || address == "::1" || address == "localhost"
}

/// First non-loopback address, falling back to the first address.
fn select_primary_ip(addresses: &[String]) -> Option<&String> {
    addresses
        .iter()
        .find(|a| !is_loopback(a))
        .or_else(|| addresses.first())
}

fn set_network_ips(value: &Value, record: &mut MachineFacts) -> bool {
    let Some(items) = value.as_list() else {
        return false;
    };
    let addresses: Vec<String> = items
        .iter()
        .filter_map(|item| item.as_string().map(str::to_string))
        .collect();
    if addresses.len() != items.len() {
        return false;
    }

    record.primary_ip = select_primary_ip(&addresses).cloned().unwrap_or_default();
    record.ip_addresses = addresses;
    true
}

/// The converter registry: one `(key, typed setter)` entry per
/// well-known flat fact key. Keep this table exhaustive; growth happens
/// here, not in ad hoc branches.
pub(crate) const CONVERTERS: &[(&str, Setter)] = &[
    ("machine_id", set_machine_id),
    ("machine_name", set_machine_name),
    ("hostname", set_hostname),
    ("system_id", set_system_id),
    ("action_file", set_action_file),
    ("project.name", set_project_name),
    ("project.path", set_project_path),
    ("os.name", set_os_name),
    ("os.version", set_os_version),
    ("cpu.cores", set_cpu_cores),
    ("cpu.model", set_cpu_model),
    ("cpu.arch", set_cpu_arch),
    ("cpu.frequency", set_cpu_frequency),
    ("memory.total", set_memory_total),
    ("memory.used", set_memory_used),
    ("memory.available", set_memory_available),
    ("network.ips", set_network_ips),
];

/// Converts a fact collection into its durable record.
///
/// `machineName` defaults to the collection's server, overridable by a
/// `machine_name` fact. `machineID` is left for the manager's derivation
/// unless a `machine_id` fact supplies it.
#[must_use]
pub fn collection_to_machine_facts(collection: &FactCollection) -> MachineFacts {
    let mut record = MachineFacts::default();
    record.machine_name = collection.server.clone();

    for (key, fact) in &collection.facts {
        if let Some(&(_, setter)) = CONVERTERS.iter().find(|(name, _)| *name == key.as_str()) {
            setter(&fact.value, &mut record);
            continue;
        }
        if let Some(tag) = key.strip_prefix(TAGS_PREFIX) {
            if let Some(value) = fact.value.as_string() {
                record.tags.insert(tag.to_string(), value.to_string());
            }
        }
        // Everything else is ignored, not an error.
    }

    record
}

/// Rehydrates a durable record into a fact collection.
///
/// One synthetic fact per populated (non-zero) field, sourced as
/// `storage`, stamped now with the server's default TTL.
#[must_use]
pub fn machine_facts_to_collection(record: &MachineFacts, default_ttl_secs: u64) -> FactCollection {
    let server = if record.machine_name.is_empty() {
        record.machine_id.clone()
    } else {
        record.machine_name.clone()
    };
    let mut collection = FactCollection::new(server);
    let source = FactSource::Storage;
    let ttl = default_ttl_secs;

    let strings = [
        ("machine_id", &record.machine_id),
        ("machine_name", &record.machine_name),
        ("hostname", &record.hostname),
        ("system_id", &record.system_id),
        ("action_file", &record.action_file),
        ("project.name", &record.project_name),
        ("project.path", &record.project_path),
        ("os.name", &record.os),
        ("os.version", &record.os_version),
        ("cpu.model", &record.cpu.model),
        ("cpu.arch", &record.cpu.arch),
    ];
    for (key, value) in strings {
        if !value.is_empty() {
            collection.insert_value(key, value.as_str(), source, ttl);
        }
    }

    if record.cpu.cores > 0 {
        collection.insert_value("cpu.cores", record.cpu.cores, source, ttl);
    }
    if record.cpu.frequency > 0.0 {
        collection.insert_value("cpu.frequency", record.cpu.frequency, source, ttl);
    }
    for (key, bytes) in [
        ("memory.total", record.memory.total),
        ("memory.used", record.memory.used),
        ("memory.available", record.memory.available),
    ] {
        if bytes > 0 {
            if let Ok(bytes) = i64::try_from(bytes) {
                collection.insert_value(key, bytes, source, ttl);
            }
        }
    }
    if !record.ip_addresses.is_empty() {
        collection.insert_value("network.ips", record.ip_addresses.clone(), source, ttl);
    }
    if !record.primary_ip.is_empty() {
        collection.insert_value("network.primary_ip", record.primary_ip.as_str(), source, ttl);
    }
    for (tag, value) in &record.tags {
        collection.insert_value(format!("{TAGS_PREFIX}{tag}"), value.as_str(), source, ttl);
    }

    collection
}

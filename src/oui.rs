//! OUI manufacturer lookup and the trusted-device filter.
//!
//! One map serves both concerns: 24-bit prefixes resolve manufacturers,
//! while full MAC addresses seeded from the trusted-device table mark probes
//! that must be dropped before any write. Built once at startup and shared
//! by reference; never mutated afterwards.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const TRUSTED_DEVICE: &str = "Trusted Device";
pub const LOCALLY_ASSIGNED: &str = "Locally Assigned";
pub const UNKNOWN_OUI: &str = "Unknown OUI";

pub struct OuiResolver {
    /// Uppercase `AA:BB:CC` prefixes to manufacturer names, plus lowercase
    /// full MACs to the trusted-device sentinel.
    map: HashMap<String, String>,
}

impl OuiResolver {
    /// Resolver with only the trusted-device entries seeded.
    pub fn new(trusted_macs: &[String]) -> Self {
        let mut map = HashMap::new();
        for mac in trusted_macs {
            map.insert(mac.to_lowercase(), TRUSTED_DEVICE.to_string());
        }
        OuiResolver { map }
    }

    /// Load the tab-separated OUI table and seed the trusted full MACs.
    pub fn load<P: AsRef<Path>>(path: P, trusted_macs: &[String]) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read OUI table: {:?}", path.as_ref()))?;

        let mut resolver = OuiResolver::new(trusted_macs);
        resolver.parse_table(&content);
        Ok(resolver)
    }

    /// Merge OUI table text: column 0 is the prefix (trailing spaces
    /// stripped), column 2 the manufacturer. `#` comments and blank lines
    /// are skipped.
    pub(crate) fn parse_table(&mut self, content: &str) {
        for line in content.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split('\t').collect();
            if columns.len() < 3 {
                continue;
            }
            let prefix = columns[0].trim_end_matches(' ').to_uppercase();
            self.map.insert(prefix, columns[2].to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Full-MAC hit against the trusted-device entries. Trusted probes are
    /// discarded before any write.
    pub fn is_trusted(&self, mac: &str) -> bool {
        self.map.contains_key(&mac.to_lowercase())
    }

    /// Manufacturer designation for a MAC: prefix hit, else the U/L bit
    /// decides between `Locally Assigned` and `Unknown OUI`.
    pub fn resolve(&self, mac: &str) -> String {
        let upper = mac.to_uppercase();
        if let Some(name) = upper.get(0..8).and_then(|prefix| self.map.get(prefix)) {
            return name.clone();
        }
        if is_locally_administered(mac) {
            LOCALLY_ASSIGNED.to_string()
        } else {
            UNKNOWN_OUI.to_string()
        }
    }
}

/// U/L bit of the first octet: set means locally administered, commonly a
/// randomized address.
pub fn is_locally_administered(mac: &str) -> bool {
    let clean = mac.replace([':', '-', '.'], "");
    if clean.len() < 2 {
        return false;
    }
    match u8::from_str_radix(&clean[0..2], 16) {
        Ok(first_octet) => (first_octet & 0x02) != 0,
        Err(_) => false,
    }
}

//! Stable device fingerprints derived from probe request information
//! elements. The fingerprint survives MAC randomization because it hashes
//! only the elements a device emits identically on every probe.

use crate::parser::InformationElement;
use sha2::{Digest, Sha256};

/// Returned when a probe carried no stable elements; never persisted as a
/// fingerprint row.
pub const NO_STABLE_IES: &str = "no_stable_ies";

/// Element IDs excluded from the digest:
/// 0 (SSID) varies per directed probe, 3 (DS Parameter Set) varies per
/// channel while hopping, 221 (Vendor Specific) embeds timestamps and nonces.
const EXCLUDED_IES: [u8; 3] = [0, 3, 221];

/// Derive the 16-hex-character fingerprint from an ordered IE list.
///
/// Tokens are sorted before hashing so cross-vendor ordering jitter does not
/// split a device into multiple fingerprints; the multiset of stable
/// elements is what identifies it.
pub fn fingerprint(ies: &[InformationElement]) -> String {
    let mut tokens: Vec<String> = ies
        .iter()
        .filter(|ie| !EXCLUDED_IES.contains(&ie.id))
        .map(|ie| format!("{}:{}:{}", ie.id, ie.len, ie.hex()))
        .collect();

    if tokens.is_empty() {
        return NO_STABLE_IES.to_string();
    }

    tokens.sort();
    let canonical = tokens.join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// JSON dump of the complete element list (stable and excluded alike) kept
/// on the fingerprint row for forensics. None when the frame had no
/// elements at all.
pub fn ie_dump(ies: &[InformationElement]) -> Option<String> {
    if ies.is_empty() {
        return None;
    }
    let entries: Vec<serde_json::Value> = ies
        .iter()
        .map(|ie| {
            serde_json::json!({
                "id": ie.id,
                "len": ie.len,
                "data": ie.hex(),
            })
        })
        .collect();
    Some(serde_json::Value::Array(entries).to_string())
}

//! Hex/bech32 dual-form identifier sets for the Cardano filter engine.
//!
//! Pool and DRep identifiers may be supplied to the filter configuration in
//! either hex or bech32 form; both forms are pre-computed once at
//! configuration time so that per-event matching is a single hex-string
//! hash-set lookup (property 6, "dual-form equivalence").

use crate::error::ConfigError;
use bech32::{Bech32, Hrp};
use blake2::{digest::consts::U20, Blake2b, Digest};
use std::collections::{HashMap, HashSet};

/// A hex/bech32 dual-form set of identifiers, e.g. pool or DRep IDs.
#[derive(Debug, Clone, Default)]
pub struct DualFormIdSet {
    hex_ids: HashSet<String>,
    bech32_ids: HashSet<String>,
    hex_to_bech32: HashMap<String, String>,
}

impl DualFormIdSet {
    /// Build a set from configured values, each either raw hex or a bech32
    /// string with the given HRP. Both forms are cached for every value.
    pub fn build(values: &[String], hrp: &str) -> Result<Self, ConfigError> {
        let mut set = Self::default();
        for value in values {
            let (hex_id, bech32_id) = if value.starts_with(hrp) && bech32::decode(value).is_ok() {
                let (_, data) = bech32::decode(value)
                    .map_err(|e| ConfigError::Bech32(format!("{value}: {e}")))?;
                let hex_id = hex::encode(&data);
                (hex_id, value.to_lowercase())
            } else {
                let bytes = hex::decode(value)?;
                let bech32_id = encode_bech32(&bytes, hrp)?;
                (value.to_lowercase(), bech32_id)
            };
            set.hex_to_bech32.insert(hex_id.clone(), bech32_id.clone());
            set.hex_ids.insert(hex_id);
            set.bech32_ids.insert(bech32_id);
        }
        Ok(set)
    }

    /// O(1) membership test against the hex-encoded form of an ID taken
    /// straight off an incoming event.
    pub fn contains_hex(&self, hex_id: &str) -> bool {
        self.hex_ids.contains(&hex_id.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.hex_ids.is_empty()
    }

    pub fn bech32_forms(&self) -> impl Iterator<Item = &str> {
        self.bech32_ids.iter().map(String::as_str)
    }
}

fn encode_bech32(bytes: &[u8], hrp: &str) -> Result<String, ConfigError> {
    let hrp = Hrp::parse(hrp).map_err(|e| ConfigError::Bech32(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, bytes).map_err(|e| ConfigError::Bech32(e.to_string()))
}

/// Derive the CIP-14 asset fingerprint ("asset1...") of a `(policy_id,
/// asset_name)` pair, given as hex strings.
pub fn asset_fingerprint(policy_id_hex: &str, asset_name_hex: &str) -> Result<String, ConfigError> {
    let policy = hex::decode(policy_id_hex)?;
    let name = hex::decode(asset_name_hex)?;
    let mut bytes = Vec::with_capacity(policy.len() + name.len());
    bytes.extend_from_slice(&policy);
    bytes.extend_from_slice(&name);

    let mut hasher = Blake2b::<U20>::new();
    hasher.update(&bytes);
    let digest = hasher.finalize();
    encode_bech32(&digest, "asset")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_bech32_pool_ids_match() {
        let hex_id = "e1b9dedb4bcb6bbb9d3a5fc1fc2b9cb1cc7a5c6b5a1f08f4e9b2d3a5c8d9f1b2";
        let set_from_hex = DualFormIdSet::build(&[hex_id.to_string()], "pool").unwrap();
        let bech32_form = set_from_hex.bech32_forms().next().unwrap().to_string();

        let set_from_bech32 = DualFormIdSet::build(&[bech32_form], "pool").unwrap();
        assert!(set_from_bech32.contains_hex(hex_id));
        assert!(set_from_hex.contains_hex(hex_id));
    }

    #[test]
    fn missing_id_does_not_match() {
        let set = DualFormIdSet::build(&["aa".repeat(28)], "pool").unwrap();
        assert!(!set.contains_hex(&"bb".repeat(28)));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let policy = "7eae28af2208be856f7a119668ae52a49b73725e326dc16579dcc373";
        let name = "6e7574636f696e";
        let fp1 = asset_fingerprint(policy, name).unwrap();
        let fp2 = asset_fingerprint(policy, name).unwrap();
        assert_eq!(fp1, fp2);
        assert!(fp1.starts_with("asset1"));
    }
}

//! Cardano address classification for the filter engine's `AddressFilter`.
//!
//! Configured address values are classified once, at configuration time,
//! into payment addresses or stake addresses (prefix `stake`), and stake
//! addresses additionally have their credential hash decoded and cached so
//! that certificate matching (stake delegation / deregistration) can
//! compare raw bytes rather than strings.

use crate::error::ConfigError;
use crate::network::NetworkId;
use pallas_addresses::{Address, Network, StakePayload};
use std::collections::{HashMap, HashSet};

/// Pre-computed address-matching state for a Cardano filter instance.
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    payment_addresses: HashSet<String>,
    stake_addresses: HashSet<String>,
    stake_credential_hashes: HashMap<String, Vec<u8>>,
}

impl AddressFilter {
    pub fn build(addresses: &[String]) -> Result<Self, ConfigError> {
        let mut filter = Self::default();
        for addr in addresses {
            if addr.starts_with("stake") {
                let parsed = Address::from_bech32(addr)
                    .map_err(|e| ConfigError::Bech32(format!("{addr}: {e}")))?;
                let hash = match parsed {
                    Address::Stake(stake) => match stake.payload() {
                        StakePayload::Stake(hash) => hash.as_ref().to_vec(),
                        StakePayload::Script(hash) => hash.as_ref().to_vec(),
                    },
                    _ => {
                        return Err(ConfigError::InvalidOption {
                            option: "address".to_string(),
                            reason: format!("{addr} has 'stake' prefix but is not a stake address"),
                        })
                    }
                };
                filter.stake_credential_hashes.insert(addr.clone(), hash);
                filter.stake_addresses.insert(addr.clone());
            } else {
                filter.payment_addresses.insert(addr.clone());
            }
        }
        Ok(filter)
    }

    pub fn is_empty(&self) -> bool {
        self.payment_addresses.is_empty() && self.stake_addresses.is_empty()
    }

    pub fn matches_payment(&self, address: &str) -> bool {
        self.payment_addresses.contains(address)
    }

    pub fn matches_stake(&self, stake_address: &str) -> bool {
        self.stake_addresses.contains(stake_address)
    }

    pub fn matches_stake_credential(&self, credential: &[u8]) -> bool {
        self.stake_credential_hashes.values().any(|cached| cached.as_slice() == credential)
    }
}

/// Derive the stake (reward) address bech32 string associated with a
/// payment address, if it carries a key- or script-hash delegation part.
pub fn derive_stake_address(payment_address: &str, network: NetworkId) -> Option<String> {
    let parsed = Address::from_bech32(payment_address).ok()?;
    let Address::Shelley(shelley) = parsed else {
        return None;
    };
    let pallas_network = match network {
        NetworkId::Mainnet => Network::Mainnet,
        NetworkId::Testnet => Network::Testnet,
    };
    let stake_address: pallas_addresses::StakeAddress = pallas_addresses::ShelleyAddress::new(
        pallas_network,
        shelley.payment().clone(),
        shelley.delegation().clone(),
    )
    .try_into()
    .ok()?;
    stake_address.to_bech32().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_payment_vs_stake() {
        let addresses = vec![
            "addr_test1vpu5vlrf4xkxv2qpwngf6cjhtw542ayty80v8dyr49rf5eg0yu8vs".to_string(),
            "stake_test1uqehkck0lajq8gr28t9uxnuvgcqrc6070x3k9r8048z8y5gssrtvn".to_string(),
        ];
        let filter = AddressFilter::build(&addresses).unwrap();
        assert!(filter.matches_payment(&addresses[0]));
        assert!(!filter.matches_stake(&addresses[0]));
        assert!(filter.matches_stake(&addresses[1]));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let filter = AddressFilter::build(&[]).unwrap();
        assert!(filter.is_empty());
        assert!(!filter.matches_payment("addr1anything"));
    }
}

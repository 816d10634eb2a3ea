//! Pre-computed filter sets and the per-event decision function.
//!
//! Every set here is built once, at configuration time, and read-only for
//! the lifetime of the plugin — matching is a handful of hash-set lookups
//! per event, no allocation beyond the occasional fingerprint digest.
//! Grounded on `modules/stake_delta_filter`'s pattern of pre-computing
//! bech32/hex dual forms once rather than per event.

use std::collections::HashSet;

use relay_common::ids::{asset_fingerprint, DualFormIdSet};
use relay_common::payload::{Certificate, Credential, DRepChoice, EventPayload, TxOutput, Voter};
use relay_common::{AddressFilter, ConfigError, Event};

/// The complete set of criteria a Cardano filter instance was configured
/// with. A criterion with an empty backing set is treated as "not
/// configured" and never fails a match.
#[derive(Debug, Clone, Default)]
pub struct FilterSets {
    pub address: AddressFilter,
    pub policy: HashSet<String>,
    pub asset: HashSet<String>,
    pub pool: DualFormIdSet,
    pub drep: DualFormIdSet,
}

impl FilterSets {
    pub fn build(
        addresses: &[String],
        policies: &[String],
        fingerprints: &[String],
        pools: &[String],
        dreps: &[String],
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            address: AddressFilter::build(addresses)?,
            policy: policies.iter().map(|p| p.to_lowercase()).collect(),
            asset: fingerprints.iter().map(|f| f.to_lowercase()).collect(),
            pool: DualFormIdSet::build(pools, "pool")?,
            drep: DualFormIdSet::build(dreps, "drep")?,
        })
    }

    fn any_configured(&self) -> bool {
        !self.address.is_empty()
            || !self.policy.is_empty()
            || !self.asset.is_empty()
            || !self.pool.is_empty()
            || !self.drep.is_empty()
    }
}

/// Decide whether `event` survives the configured filter sets (spec's
/// policy table: Block -> pool only, Transaction -> address/policy/
/// asset/pool/drep all-configured-must-match, Governance -> drep only,
/// anything else passes through unconditionally).
pub fn passes(event: &Event, sets: &FilterSets) -> bool {
    match &event.payload {
        EventPayload::Block(block) => sets.pool.is_empty() || sets.pool.contains_hex(&block.issuer_vkey),
        EventPayload::Transaction(tx) | EventPayload::MempoolTransaction(tx) => {
            let outputs: Vec<&TxOutput> = tx.outputs.iter().chain(tx.resolved_inputs.iter()).collect();

            (sets.address.is_empty() || address_matches(&sets.address, &outputs, &tx.certificates))
                && (sets.policy.is_empty() || policy_matches(&sets.policy, &outputs))
                && (sets.asset.is_empty() || asset_matches(&sets.asset, &outputs))
                && (sets.pool.is_empty() || pool_matches(&sets.pool, &tx.certificates))
                && (sets.drep.is_empty()
                    || drep_matches_certificates(&sets.drep, &tx.certificates))
        }
        EventPayload::Governance(gov) => {
            sets.drep.is_empty()
                || drep_matches_certificates(&sets.drep, &gov.drep_certificates)
                || drep_matches_certificates(&sets.drep, &gov.vote_delegation_certificates)
                || gov.voting_procedures.iter().any(|entry| match &entry.voter {
                    Voter::DRep(credential) => sets.drep.contains_hex(&hex::encode(credential.bytes())),
                    _ => false,
                })
        }
        EventPayload::Rollback(_) | EventPayload::Other(_) => true,
    }
}

fn address_matches(filter: &AddressFilter, outputs: &[&TxOutput], certificates: &[Certificate]) -> bool {
    outputs.iter().any(|output| {
        filter.matches_payment(&output.address)
            || output.stake_address.as_deref().is_some_and(|s| filter.matches_stake(s))
    }) || certificates.iter().any(|cert| match cert {
        Certificate::StakeDelegation { credential, .. } | Certificate::StakeDeregistration { credential } => {
            filter.matches_stake_credential(credential.bytes())
        }
        _ => false,
    })
}

fn policy_matches(filter: &HashSet<String>, outputs: &[&TxOutput]) -> bool {
    outputs
        .iter()
        .flat_map(|output| output.assets.iter())
        .any(|asset| filter.contains(&asset.policy_id.to_lowercase()))
}

fn asset_matches(filter: &HashSet<String>, outputs: &[&TxOutput]) -> bool {
    outputs.iter().flat_map(|output| output.assets.iter()).any(|asset| {
        asset_fingerprint(&asset.policy_id, &asset.asset_name)
            .map(|fp| filter.contains(&fp.to_lowercase()))
            .unwrap_or(false)
    })
}

fn pool_matches(filter: &DualFormIdSet, certificates: &[Certificate]) -> bool {
    certificates.iter().any(|cert| match cert {
        Certificate::StakeDelegation { pool_id, .. } | Certificate::StakeVoteDelegation { pool_id, .. } => {
            filter.contains_hex(pool_id)
        }
        Certificate::PoolRetirement { operator, .. } | Certificate::PoolRegistration { operator } => {
            filter.contains_hex(operator)
        }
        _ => false,
    })
}

fn drep_credential(choice: &DRepChoice) -> Option<&Credential> {
    match choice {
        DRepChoice::Credential(credential) => Some(credential),
        DRepChoice::Abstain | DRepChoice::NoConfidence => None,
    }
}

fn drep_matches_certificates(filter: &DualFormIdSet, certificates: &[Certificate]) -> bool {
    certificates.iter().any(|cert| match cert {
        Certificate::DRepRegistration { drep, .. }
        | Certificate::DRepUpdate { drep }
        | Certificate::DRepDeregistration { drep, .. } => filter.contains_hex(&hex::encode(drep.bytes())),
        Certificate::VoteDelegation { drep, .. } | Certificate::StakeVoteDelegation { drep, .. } => drep_credential(drep)
            .is_some_and(|c| filter.contains_hex(&hex::encode(c.bytes()))),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use relay_common::payload::{BlockPayload, OutputAsset, RollbackPayload, TransactionPayload};
    use std::collections::HashMap;

    fn empty_tx() -> TransactionPayload {
        TransactionPayload {
            block_hash: "bh".to_string(),
            inputs: vec![],
            outputs: vec![],
            resolved_inputs: vec![],
            certificates: vec![],
            reference_inputs: vec![],
            withdrawals: HashMap::new(),
            metadata: None,
            witnesses: serde_json::Value::Null,
            fee: 0,
            ttl: None,
            transaction_cbor: None,
        }
    }

    #[test]
    fn empty_filter_sets_pass_everything() {
        let sets = FilterSets::default();
        assert!(!sets.any_configured());
        let event = Event::new(
            "chainsync.rollback",
            Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload { block_hash: "a".to_string(), slot_number: 1 }),
        );
        assert!(passes(&event, &sets));
    }

    #[test]
    fn transaction_matches_on_configured_policy() {
        let sets = FilterSets::build(&[], &["abc123".to_string()], &[], &[], &[]).unwrap();
        let mut tx = empty_tx();
        tx.outputs.push(TxOutput {
            address: "addr1anything".to_string(),
            stake_address: None,
            lovelace: 10,
            assets: vec![OutputAsset { policy_id: "ABC123".to_string(), asset_name: "".to_string(), amount: 1 }],
        });
        let event = Event::new("chainsync.transaction", Utc::now(), None, EventPayload::Transaction(tx));
        assert!(passes(&event, &sets));
    }

    #[test]
    fn transaction_with_unlisted_policy_fails() {
        let sets = FilterSets::build(&[], &["abc123".to_string()], &[], &[], &[]).unwrap();
        let mut tx = empty_tx();
        tx.outputs.push(TxOutput {
            address: "addr1anything".to_string(),
            stake_address: None,
            lovelace: 10,
            assets: vec![OutputAsset { policy_id: "ffffff".to_string(), asset_name: "".to_string(), amount: 1 }],
        });
        let event = Event::new("chainsync.transaction", Utc::now(), None, EventPayload::Transaction(tx));
        assert!(!passes(&event, &sets));
    }

    #[test]
    fn block_matches_only_on_configured_pool() {
        let sets = FilterSets::build(&[], &[], &[], &["aa".repeat(28)], &[]).unwrap();
        let matching = Event::new(
            "chainsync.block",
            Utc::now(),
            None,
            EventPayload::Block(BlockPayload {
                block_hash: "bh".to_string(),
                issuer_vkey: "aa".repeat(28),
                block_body_size: 0,
                transaction_count: 0,
                block_cbor: None,
            }),
        );
        assert!(passes(&matching, &sets));

        let other = Event::new(
            "chainsync.block",
            Utc::now(),
            None,
            EventPayload::Block(BlockPayload {
                block_hash: "bh".to_string(),
                issuer_vkey: "bb".repeat(28),
                block_body_size: 0,
                transaction_count: 0,
                block_cbor: None,
            }),
        );
        assert!(!passes(&other, &sets));
    }

    #[test]
    fn enlarging_a_set_only_increases_matches() {
        let narrow = FilterSets::build(&[], &["abc123".to_string()], &[], &[], &[]).unwrap();
        let wide = FilterSets::build(&[], &["abc123".to_string(), "def456".to_string()], &[], &[], &[]).unwrap();

        let mut tx = empty_tx();
        tx.outputs.push(TxOutput {
            address: "addr1anything".to_string(),
            stake_address: None,
            lovelace: 10,
            assets: vec![OutputAsset { policy_id: "def456".to_string(), asset_name: "".to_string(), amount: 1 }],
        });
        let event = Event::new("chainsync.transaction", Utc::now(), None, EventPayload::Transaction(tx));

        assert!(!passes(&event, &narrow));
        assert!(passes(&event, &wide));
    }
}

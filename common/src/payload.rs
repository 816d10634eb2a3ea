//! Event payload variants (spec §3). Payloads are a closed sum type; a
//! filter that doesn't recognize a case (`Other`) must pass it through.

use std::collections::HashMap;

/// A stake or script credential, as carried by certificates and voters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Credential {
    AddrKeyHash(Vec<u8>),
    ScriptHash(Vec<u8>),
}

impl Credential {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::AddrKeyHash(b) | Self::ScriptHash(b) => b,
        }
    }
}

/// A DRep, either an individual credential or one of the two fixed choices.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DRepChoice {
    Credential(Credential),
    Abstain,
    NoConfidence,
}

/// Subset of certificate kinds the filter engine inspects; everything else
/// collapses into `Other` and is transparent to filters.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Certificate {
    StakeRegistration { credential: Credential },
    StakeDeregistration { credential: Credential },
    StakeDelegation { credential: Credential, pool_id: String },
    PoolRegistration { operator: String },
    PoolRetirement { operator: String, epoch: u64 },
    VoteDelegation { credential: Credential, drep: DRepChoice },
    StakeVoteDelegation { credential: Credential, pool_id: String, drep: DRepChoice },
    DRepRegistration { drep: Credential, deposit: u64 },
    DRepUpdate { drep: Credential },
    DRepDeregistration { drep: Credential, deposit: u64 },
    Other,
}

/// A single native asset quantity within a transaction output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OutputAsset {
    pub policy_id: String,
    pub asset_name: String,
    pub amount: u128,
}

/// A transaction output, enough of it for address/policy/asset matching.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxOutput {
    pub address: String,
    pub stake_address: Option<String>,
    pub lovelace: u64,
    pub assets: Vec<OutputAsset>,
}

/// A transaction input reference.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxInput {
    pub tx_hash: String,
    pub index: u32,
}

/// Who cast a vote in a governance action.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Voter {
    ConstitutionalCommittee(Credential),
    DRep(Credential),
    StakePool(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VotingProceduresEntry {
    pub voter: Voter,
    pub action_ids: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProposalProcedure {
    pub deposit: u64,
    pub reward_account: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockPayload {
    pub block_hash: String,
    pub issuer_vkey: String,
    pub block_body_size: u64,
    pub transaction_count: u32,
    pub block_cbor: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionPayload {
    pub block_hash: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub resolved_inputs: Vec<TxOutput>,
    pub certificates: Vec<Certificate>,
    pub reference_inputs: Vec<TxInput>,
    pub withdrawals: HashMap<String, u64>,
    pub metadata: Option<serde_json::Value>,
    pub witnesses: serde_json::Value,
    pub fee: u64,
    pub ttl: Option<u64>,
    pub transaction_cbor: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RollbackPayload {
    pub block_hash: String,
    pub slot_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GovernancePayload {
    pub block_hash: String,
    pub proposal_procedures: Vec<ProposalProcedure>,
    pub voting_procedures: Vec<VotingProceduresEntry>,
    pub drep_certificates: Vec<Certificate>,
    pub vote_delegation_certificates: Vec<Certificate>,
    pub committee_certificates: Vec<Certificate>,
    pub transaction_cbor: Option<Vec<u8>>,
}

/// The closed set of event payload variants. `Other` represents a payload
/// shape the filter engine does not know about; it always passes through.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventPayload {
    Block(BlockPayload),
    Transaction(TransactionPayload),
    Rollback(RollbackPayload),
    Governance(GovernancePayload),
    MempoolTransaction(TransactionPayload),
    Other(serde_json::Value),
}

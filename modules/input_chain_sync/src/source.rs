//! Abstraction over the upstream chain-sync protocol client, which is an
//! external collaborator (spec §1's "upstream network protocol clients ...
//! seen only through the event interface they produce"). Grounded on
//! `modules/peer_network_interface`'s split between the mini-protocol
//! `NetworkManager` and the `BlockSink` that turns roll-forward/backward
//! callbacks into messages — here that split is a trait boundary instead
//! of an internal struct split, since the protocol client itself is out
//! of scope.

use async_trait::async_trait;
use relay_common::payload::{GovernancePayload, TransactionPayload};

/// One block's worth of decoded transactions and governance data, enough
/// for the plugin to synthesize a `BlockEvent`, one `TransactionEvent`
/// per transaction, and one `GovernanceEvent` per transaction carrying
/// governance data.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RollForwardBlock {
    pub block_hash: String,
    pub issuer_vkey: String,
    pub era: String,
    pub block_number: u64,
    pub slot_number: u64,
    pub network_magic: u32,
    pub block_body_size: u64,
    pub block_cbor: Option<Vec<u8>>,
    pub transactions: Vec<RawTransaction>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawTransaction {
    pub transaction_hash: String,
    pub payload: TransactionPayload,
    pub governance: Option<GovernancePayload>,
}

/// What the upstream source reported since the last poll.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainSyncUpdate {
    RollForward(Box<RollForwardBlock>),
    RollBackward { slot_number: u64, block_hash: String },
    /// The source reconnected after a transient disconnection; carries no
    /// data, only a signal the plugin surfaces via its reconnect callback.
    Reconnected,
}

/// The narrow interface the chain-sync input plugin drives. A real
/// implementation wraps a node-to-client mini-protocol session; tests use
/// [`ScriptedChainSource`].
#[async_trait]
pub trait ChainSyncSource: Send + Sync {
    /// Block until the next update is available. Returning `Err` is
    /// treated as a transient upstream failure; the plugin retries with
    /// backoff and, on success, reports a `Reconnected` update itself.
    async fn next(&mut self) -> anyhow::Result<ChainSyncUpdate>;
}

/// A fixed, in-memory chain-sync source that replays a scripted sequence
/// of updates once, then blocks forever — enough to drive the plugin's
/// synthesis logic in tests without a real upstream.
pub struct ScriptedChainSource {
    script: std::collections::VecDeque<anyhow::Result<ChainSyncUpdate>>,
}

impl ScriptedChainSource {
    pub fn new(script: Vec<anyhow::Result<ChainSyncUpdate>>) -> Self {
        Self { script: script.into() }
    }
}

#[async_trait]
impl ChainSyncSource for ScriptedChainSource {
    async fn next(&mut self) -> anyhow::Result<ChainSyncUpdate> {
        match self.script.pop_front() {
            Some(update) => update,
            None => std::future::pending().await,
        }
    }
}

//! Abstraction over the upstream mempool snapshot client, an external
//! collaborator exactly like [`relay_input_chain_sync::source`]. Grounded
//! on the same `peer_network_interface`-style trait boundary, narrowed to
//! a single `snapshot()` call since mempool access is poll-based rather
//! than callback-driven.

use async_trait::async_trait;
use relay_common::payload::TransactionPayload;

/// One transaction as reported by the mempool snapshot, enough to derive
/// its hash and build a `MempoolTransactionEvent`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawMempoolTx {
    pub transaction_cbor: Vec<u8>,
    pub payload: TransactionPayload,
}

/// The narrow interface the mempool input plugin polls. A real
/// implementation wraps a local-tx-monitor mini-protocol session; tests
/// use [`ScriptedMempoolSource`].
#[async_trait]
pub trait MempoolSource: Send + Sync {
    /// Fetch the current mempool contents. Returning `Err` is treated as a
    /// transient upstream failure; the plugin logs it, leaves the
    /// previous-poll set untouched, and retries on the next tick.
    async fn snapshot(&mut self) -> anyhow::Result<Vec<RawMempoolTx>>;
}

/// A scripted mempool source for tests: returns each queued snapshot in
/// turn, then keeps returning the last one (a steady-state mempool with
/// no further arrivals) once the script is exhausted.
pub struct ScriptedMempoolSource {
    script: std::collections::VecDeque<anyhow::Result<Vec<RawMempoolTx>>>,
    last: Vec<RawMempoolTx>,
}

impl ScriptedMempoolSource {
    pub fn new(script: Vec<anyhow::Result<Vec<RawMempoolTx>>>) -> Self {
        Self { script: script.into(), last: Vec::new() }
    }
}

#[async_trait]
impl MempoolSource for ScriptedMempoolSource {
    async fn snapshot(&mut self) -> anyhow::Result<Vec<RawMempoolTx>> {
        match self.script.pop_front() {
            Some(Ok(txs)) => {
                self.last = txs.clone();
                Ok(txs)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.clone()),
        }
    }
}

//! The universal event envelope (spec §3, §4.1).

use crate::payload::EventPayload;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockContext {
    pub era: String,
    pub block_number: u64,
    pub slot_number: u64,
    pub network_magic: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionContext {
    pub transaction_hash: String,
    pub block_number: u64,
    pub slot_number: u64,
    pub transaction_idx: u32,
    pub network_magic: u32,
}

/// The context variant carried alongside a payload; `Rollback` and
/// `MempoolTransaction` payloads have no context (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventContext {
    Block(BlockContext),
    Transaction(TransactionContext),
    Governance(TransactionContext),
}

/// The envelope carrying every event through the pipeline: `{type,
/// timestamp, context, payload}`, flat, with no enveloping level/message
/// fields (spec §4.1).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub context: Option<EventContext>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        context: Option<EventContext>,
        payload: EventPayload,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            context,
            payload,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub mod types {
    pub const BLOCK: &str = "chainsync.block";
    pub const TRANSACTION: &str = "chainsync.transaction";
    pub const ROLLBACK: &str = "chainsync.rollback";
    pub const GOVERNANCE: &str = "chainsync.governance";
    pub const MEMPOOL_TRANSACTION: &str = "mempool.transaction";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::RollbackPayload;

    #[test]
    fn serializes_as_flat_object() {
        let event = Event::new(
            types::ROLLBACK,
            Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload {
                block_hash: "deadbeef".to_string(),
                slot_number: 42,
            }),
        );
        let json = event.to_json().unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert!(obj.contains_key("type"));
        assert!(obj.contains_key("timestamp"));
        assert!(obj.contains_key("context"));
        assert!(obj.contains_key("payload"));
        assert!(obj.get("context").unwrap().is_null());
    }
}

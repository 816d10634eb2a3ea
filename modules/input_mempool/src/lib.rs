//! Mempool input plugin: polls an upstream mempool snapshot on a fixed
//! interval and emits a `mempool.transaction` event for every transaction
//! hash seen this poll but not the previous one (spec §4.8).
//!
//! Memory is bounded by the mempool's current size, not its lifetime:
//! only the previous poll's hash set is retained, never an ever-growing
//! history (spec §9 design note).

pub mod source;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use relay_common::event::types;
use relay_common::payload::EventPayload;
use relay_common::{blake2b_256_hex, Event, PluginError};
use relay_pipeline::{
    ApiRouteRegistrar, HealthCheck, OptionSpec, OptionType, OptionValue, Plugin, PluginEntry,
    PluginKind, RestartableErrorChannel, RestartableEventChannel, ShutdownSignal,
    STAGE_CHANNEL_CAPACITY,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use source::MempoolSource;

pub const PLUGIN_NAME: &str = "mempool";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

pub struct MempoolInputPlugin {
    source: Arc<Mutex<Box<dyn MempoolSource>>>,
    poll_interval: Duration,
    outbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl MempoolInputPlugin {
    pub fn new(source: Box<dyn MempoolSource>, poll_interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            poll_interval,
            outbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: Arc::new(RestartableErrorChannel::new(4)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Input,
            name: PLUGIN_NAME.to_string(),
            description: "Polls an upstream mempool and emits newly-seen transactions".to_string(),
            options: vec![OptionSpec::new(
                "poll-interval-seconds",
                OptionType::Uint,
                OptionValue::Uint(DEFAULT_POLL_INTERVAL_SECS),
            )
            .with_description("Seconds between mempool polls")],
            factory: Arc::new(|_options| {
                anyhow::bail!(
                    "mempool input requires a concrete MempoolSource; construct it with MempoolInputPlugin::new instead of the registry factory"
                )
            }),
        }
    }
}

#[async_trait]
impl HealthCheck for MempoolInputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for MempoolInputPlugin {}

#[async_trait]
impl Plugin for MempoolInputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Input
    }

    fn description(&self) -> &str {
        "Mempool polling input"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.outbound.reset().await;
        self.errors.reset().await;

        let outbound_tx = self.outbound.sender().await.expect("reset channel has a sender");
        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let source = self.source.clone();
        let errors = self.errors.clone();
        let poll_interval = self.poll_interval;
        let worker_shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut previous: HashSet<String> = HashSet::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    _ = ticker.tick() => {}
                }

                let snapshot = {
                    let mut guard = source.lock().await;
                    guard.snapshot().await
                };

                let txs = match snapshot {
                    Ok(txs) => txs,
                    Err(e) => {
                        warn!(error = %e, "mempool snapshot failed, keeping previous poll set");
                        errors.publish(PluginError::Upstream(e.to_string())).await;
                        continue;
                    }
                };

                let mut current: HashSet<String> = HashSet::with_capacity(txs.len());
                for tx in &txs {
                    current.insert(blake2b_256_hex(&tx.transaction_cbor));
                }

                for tx in &txs {
                    let hash = blake2b_256_hex(&tx.transaction_cbor);
                    if previous.contains(&hash) {
                        continue;
                    }
                    let event = Event::new(
                        types::MEMPOOL_TRANSACTION,
                        Utc::now(),
                        None,
                        EventPayload::MempoolTransaction(tx.payload.clone()),
                    );
                    tokio::select! {
                        _ = worker_shutdown.signalled() => return,
                        result = outbound_tx.send(event) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }

                previous = current;
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "mempool input started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            shutdown.signal();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        self.outbound.close().await;
        self.errors.close().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn take_error_chan(&self) -> Option<tokio::sync::mpsc::Receiver<PluginError>> {
        self.errors.take_receiver().await
    }

    async fn input_chan(&self) -> Option<tokio::sync::mpsc::Sender<Event>> {
        None
    }

    async fn take_output_chan(&self) -> Option<tokio::sync::mpsc::Receiver<Event>> {
        self.outbound.take_receiver().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::payload::{EventPayload as Payload, TransactionPayload};
    use source::{RawMempoolTx, ScriptedMempoolSource};
    use std::collections::HashMap;

    fn tx(cbor_tag: u8) -> RawMempoolTx {
        RawMempoolTx {
            transaction_cbor: vec![cbor_tag],
            payload: TransactionPayload {
                block_hash: String::new(),
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
            },
        }
    }

    #[tokio::test]
    async fn emits_only_newly_seen_transactions() {
        let script = vec![Ok(vec![tx(1), tx(2)]), Ok(vec![tx(2), tx(3)])];
        let source = Box::new(ScriptedMempoolSource::new(script));
        let plugin = MempoolInputPlugin::new(source, Duration::from_millis(5));

        plugin.start().await.unwrap();
        let mut rx = plugin.take_output_chan().await.unwrap();

        let mut seen_cbors = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.event_type, types::MEMPOOL_TRANSACTION);
            assert!(event.context.is_none());
            if let Payload::MempoolTransaction(_) = &event.payload {
                seen_cbors.push(());
            } else {
                panic!("expected mempool transaction payload");
            }
        }
        assert_eq!(seen_cbors.len(), 3);

        plugin.stop().await.unwrap();
    }

    #[tokio::test]
    async fn restart_is_safe() {
        let source = Box::new(ScriptedMempoolSource::new(vec![Ok(vec![tx(1)])]));
        let plugin = MempoolInputPlugin::new(source, Duration::from_millis(5));
        plugin.start().await.unwrap();
        plugin.stop().await.unwrap();
        plugin.stop().await.unwrap();
        plugin.start().await.unwrap();
        plugin.stop().await.unwrap();
    }
}

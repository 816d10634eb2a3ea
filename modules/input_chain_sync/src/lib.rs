//! Chain-sync input plugin: drives a [`source::ChainSyncSource`], buffers
//! roll-forwards for an optional confirmation delay, and synthesizes
//! `BlockEvent`/`TransactionEvent`/`GovernanceEvent`/`RollbackEvent`s.

pub mod source;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use relay_common::event::types;
use relay_common::payload::{BlockPayload, EventPayload, RollbackPayload};
use relay_common::{BlockContext, Event, EventContext, PluginError, TransactionContext};
use relay_pipeline::{
    ApiRouteRegistrar, BackoffConfig, HealthCheck, OptionSpec, OptionType, OptionValue, Plugin,
    PluginEntry, PluginKind, RestartableErrorChannel, RestartableEventChannel, ShutdownSignal,
    STAGE_CHANNEL_CAPACITY,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use source::{ChainSyncSource, ChainSyncUpdate, RollForwardBlock};

pub const PLUGIN_NAME: &str = "chain-sync";

/// Type alias for the caller-visible callback fired after a reconnect.
pub type ReconnectCallback = Arc<dyn Fn() + Send + Sync>;

fn block_events(block: &RollForwardBlock, include_cbor: bool) -> Vec<Event> {
    let mut events = Vec::with_capacity(1 + block.transactions.len() * 2);

    events.push(Event::new(
        types::BLOCK,
        Utc::now(),
        Some(EventContext::Block(BlockContext {
            era: block.era.clone(),
            block_number: block.block_number,
            slot_number: block.slot_number,
            network_magic: block.network_magic,
        })),
        EventPayload::Block(BlockPayload {
            block_hash: block.block_hash.clone(),
            issuer_vkey: block.issuer_vkey.clone(),
            block_body_size: block.block_body_size,
            transaction_count: block.transactions.len() as u32,
            block_cbor: if include_cbor { block.block_cbor.clone() } else { None },
        }),
    ));

    for (idx, tx) in block.transactions.iter().enumerate() {
        let tx_context = TransactionContext {
            transaction_hash: tx.transaction_hash.clone(),
            block_number: block.block_number,
            slot_number: block.slot_number,
            transaction_idx: idx as u32,
            network_magic: block.network_magic,
        };

        let mut payload = tx.payload.clone();
        if !include_cbor {
            payload.transaction_cbor = None;
        }
        events.push(Event::new(
            types::TRANSACTION,
            Utc::now(),
            Some(EventContext::Transaction(tx_context.clone())),
            EventPayload::Transaction(payload),
        ));

        if let Some(governance) = &tx.governance {
            let mut governance = governance.clone();
            if !include_cbor {
                governance.transaction_cbor = None;
            }
            events.push(Event::new(
                types::GOVERNANCE,
                Utc::now(),
                Some(EventContext::Governance(tx_context)),
                EventPayload::Governance(governance),
            ));
        }
    }

    events
}

fn rollback_event(slot_number: u64, block_hash: String) -> Event {
    Event::new(
        types::ROLLBACK,
        Utc::now(),
        None,
        EventPayload::Rollback(RollbackPayload { block_hash, slot_number }),
    )
}

pub struct ChainSyncInputPlugin {
    source: Arc<Mutex<Box<dyn ChainSyncSource>>>,
    confirmation_delay: u64,
    include_cbor: bool,
    on_reconnect: Option<ReconnectCallback>,
    outbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl ChainSyncInputPlugin {
    pub fn new(source: Box<dyn ChainSyncSource>, confirmation_delay: u64, include_cbor: bool) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            confirmation_delay,
            include_cbor,
            on_reconnect: None,
            outbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: Arc::new(RestartableErrorChannel::new(4)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn with_reconnect_callback(mut self, callback: ReconnectCallback) -> Self {
        self.on_reconnect = Some(callback);
        self
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Input,
            name: PLUGIN_NAME.to_string(),
            description: "Synthesizes chain events from an upstream chain-sync source".to_string(),
            options: vec![
                OptionSpec::new("confirmation-delay", OptionType::Uint, OptionValue::Uint(0))
                    .with_description("Blocks to buffer before emitting (0 = emit immediately)"),
                OptionSpec::new("include-cbor", OptionType::Bool, OptionValue::Bool(false))
                    .with_description("Attach raw CBOR bytes to emitted events"),
            ],
            factory: Arc::new(|_options| {
                anyhow::bail!(
                    "chain-sync input requires a concrete ChainSyncSource; construct it with ChainSyncInputPlugin::new instead of the registry factory"
                )
            }),
        }
    }
}

#[async_trait]
impl HealthCheck for ChainSyncInputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for ChainSyncInputPlugin {}

#[async_trait]
impl Plugin for ChainSyncInputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Input
    }

    fn description(&self) -> &str {
        "Cardano chain-sync input"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.outbound.reset().await;
        self.errors.reset().await;

        let outbound_tx = self.outbound.sender().await.expect("reset channel has a sender");
        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let confirmation_delay = self.confirmation_delay as usize;
        let include_cbor = self.include_cbor;
        let on_reconnect = self.on_reconnect.clone();
        let errors = self.errors.clone();
        let source = self.source.clone();

        let worker_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut buffer: VecDeque<RollForwardBlock> = VecDeque::new();
            let backoff = BackoffConfig::default();
            let mut delay = backoff.initial_delay;
            let mut had_failure = false;

            loop {
                let update = {
                    let mut guard = source.lock().await;
                    tokio::select! {
                        _ = worker_shutdown.signalled() => return,
                        update = guard.next() => update,
                    }
                };

                match update {
                    Ok(ChainSyncUpdate::RollForward(block)) => {
                        if had_failure {
                            had_failure = false;
                            delay = backoff.initial_delay;
                            if let Some(callback) = &on_reconnect {
                                callback();
                            }
                        }
                        buffer.push_back(*block);
                        while buffer.len() > confirmation_delay {
                            let Some(confirmed) = buffer.pop_front() else { break };
                            for event in block_events(&confirmed, include_cbor) {
                                tokio::select! {
                                    _ = worker_shutdown.signalled() => return,
                                    result = outbound_tx.send(event) => {
                                        if result.is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Ok(ChainSyncUpdate::RollBackward { slot_number, block_hash }) => {
                        buffer.retain(|b| b.slot_number <= slot_number);
                        tokio::select! {
                            _ = worker_shutdown.signalled() => return,
                            result = outbound_tx.send(rollback_event(slot_number, block_hash)) => {
                                if result.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Ok(ChainSyncUpdate::Reconnected) => {
                        if let Some(callback) = &on_reconnect {
                            callback();
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "chain-sync upstream error, retrying");
                        errors.publish(PluginError::Upstream(e.to_string())).await;
                        had_failure = true;
                        tokio::select! {
                            _ = worker_shutdown.signalled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        delay = (delay * backoff.multiplier).min(backoff.max_delay);
                    }
                }
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "chain-sync input started");
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

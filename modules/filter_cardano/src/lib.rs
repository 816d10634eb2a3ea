//! A filter plugin matching Cardano addresses, asset policies, asset
//! fingerprints, stake pools, and DReps against the hot path.

mod filters;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{ConfigError, Event, PluginError};
use relay_pipeline::{
    ApiRouteRegistrar, HealthCheck, OptionSpec, OptionType, OptionValue, Plugin, PluginEntry,
    PluginKind, RestartableErrorChannel, RestartableEventChannel, ShutdownSignal,
    STAGE_CHANNEL_CAPACITY,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

pub use filters::{passes, FilterSets};

pub const PLUGIN_NAME: &str = "cardano";

/// Comma-separated list options; every criterion is independently
/// optional, and an unset criterion never fails a match (spec §4.5).
fn csv_option(name: &'static str) -> OptionSpec {
    OptionSpec::new(name, OptionType::String, OptionValue::String(String::new()))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct CardanoFilterPlugin {
    sets: Arc<FilterSets>,
    inbound: RestartableEventChannel,
    outbound: RestartableEventChannel,
    errors: RestartableErrorChannel,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CardanoFilterPlugin {
    pub fn new(sets: FilterSets) -> Self {
        Self {
            sets: Arc::new(sets),
            inbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            outbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: RestartableErrorChannel::new(4),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_options(options: relay_pipeline::ResolvedOptions) -> Result<Self, ConfigError> {
        let addresses = split_csv(&options.string("addresses").unwrap_or_default());
        let policies = split_csv(&options.string("policies").unwrap_or_default());
        let fingerprints = split_csv(&options.string("asset-fingerprints").unwrap_or_default());
        let pools = split_csv(&options.string("pools").unwrap_or_default());
        let dreps = split_csv(&options.string("dreps").unwrap_or_default());
        let sets = FilterSets::build(&addresses, &policies, &fingerprints, &pools, &dreps)?;
        Ok(Self::new(sets))
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Filter,
            name: PLUGIN_NAME.to_string(),
            description: "Filters events by Cardano address, policy, asset, pool, and DRep".to_string(),
            options: vec![
                csv_option("addresses").with_description("Comma-separated payment or stake addresses"),
                csv_option("policies").with_description("Comma-separated asset policy IDs (hex)"),
                csv_option("asset-fingerprints").with_description("Comma-separated CIP-14 asset fingerprints"),
                csv_option("pools").with_description("Comma-separated pool IDs (hex or bech32)"),
                csv_option("dreps").with_description("Comma-separated DRep IDs (hex or bech32)"),
            ],
            factory: Arc::new(|options| {
                Ok(Box::new(CardanoFilterPlugin::from_options(options)?) as Box<dyn Plugin>)
            }),
        }
    }
}

#[async_trait]
impl HealthCheck for CardanoFilterPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for CardanoFilterPlugin {}

#[async_trait]
impl Plugin for CardanoFilterPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Filter
    }

    fn description(&self) -> &str {
        "Cardano address/policy/asset/pool/DRep filter"
    }

    #[instrument(skip(self), name = "cardano_filter_start")]
    async fn start(&self) -> anyhow::Result<()> {
        self.inbound.reset().await;
        self.outbound.reset().await;
        self.errors.reset().await;

        let mut inbound_rx = self
            .inbound
            .take_receiver()
            .await
            .expect("freshly reset inbound channel always has a receiver");
        let outbound_tx = self.outbound.sender().await.expect("freshly reset outbound channel");

        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let sets = self.sets.clone();
        let worker_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { return };
                        if filters::passes(&event, &sets) {
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
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "cardano filter started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.shutdown.lock().await.take() {
            shutdown.signal();
        }
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        self.inbound.close().await;
        self.outbound.close().await;
        self.errors.close().await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn take_error_chan(&self) -> Option<tokio::sync::mpsc::Receiver<PluginError>> {
        self.errors.take_receiver().await
    }

    async fn input_chan(&self) -> Option<tokio::sync::mpsc::Sender<Event>> {
        self.inbound.sender().await
    }

    async fn take_output_chan(&self) -> Option<tokio::sync::mpsc::Receiver<Event>> {
        self.outbound.take_receiver().await
    }
}

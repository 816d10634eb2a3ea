//! Drops events whose `type` is not in a configured allow-list. An empty
//! list allows everything through (spec §4.6).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_common::{Event, PluginError};
use relay_pipeline::{
    ApiRouteRegistrar, HealthCheck, OptionSpec, OptionType, OptionValue, Plugin, PluginEntry,
    PluginKind, RestartableErrorChannel, RestartableEventChannel, ShutdownSignal,
    STAGE_CHANNEL_CAPACITY,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

pub const PLUGIN_NAME: &str = "event-type";

pub fn passes(event: &Event, allow_list: &HashSet<String>) -> bool {
    allow_list.is_empty() || allow_list.contains(&event.event_type)
}

pub struct EventTypeFilterPlugin {
    allow_list: Arc<HashSet<String>>,
    inbound: RestartableEventChannel,
    outbound: RestartableEventChannel,
    errors: RestartableErrorChannel,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl EventTypeFilterPlugin {
    pub fn new(allow_list: HashSet<String>) -> Self {
        Self {
            allow_list: Arc::new(allow_list),
            inbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            outbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: RestartableErrorChannel::new(4),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Filter,
            name: PLUGIN_NAME.to_string(),
            description: "Drops events whose type is not in an allow-list".to_string(),
            options: vec![OptionSpec::new(
                "types",
                OptionType::String,
                OptionValue::String(String::new()),
            )
            .with_description("Comma-separated list of allowed event types")],
            factory: Arc::new(|options| {
                let allow_list: HashSet<String> = options
                    .string("types")
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(Box::new(EventTypeFilterPlugin::new(allow_list)) as Box<dyn Plugin>)
            }),
        }
    }
}

#[async_trait]
impl HealthCheck for EventTypeFilterPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for EventTypeFilterPlugin {}

#[async_trait]
impl Plugin for EventTypeFilterPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Filter
    }

    fn description(&self) -> &str {
        "Event-type allow-list filter"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.inbound.reset().await;
        self.outbound.reset().await;
        self.errors.reset().await;

        let mut inbound_rx = self.inbound.take_receiver().await.expect("reset channel has a receiver");
        let outbound_tx = self.outbound.sender().await.expect("reset channel has a sender");

        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let allow_list = self.allow_list.clone();
        let worker_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { return };
                        if passes(&event, &allow_list) {
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
        info!(plugin = PLUGIN_NAME, "event-type filter started");
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_passes_everything() {
        assert!(passes(&sample_event("chainsync.block"), &HashSet::new()));
    }

    #[test]
    fn nonempty_allow_list_drops_unlisted_types() {
        let allow: HashSet<String> = ["chainsync.block".to_string()].into_iter().collect();
        assert!(passes(&sample_event("chainsync.block"), &allow));
        assert!(!passes(&sample_event("chainsync.rollback"), &allow));
    }

    fn sample_event(event_type: &str) -> Event {
        Event::new(
            event_type,
            chrono::Utc::now(),
            None,
            relay_common::payload::EventPayload::Other(serde_json::json!({})),
        )
    }
}

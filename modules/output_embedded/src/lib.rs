//! Embedded output plugin: hands each event to an in-process callback
//! instead of delivering it over the network. This is the seam a host
//! application uses to consume events directly when the daemon is run
//! as a library rather than a standalone process.

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
use tracing::{info, warn};

pub const PLUGIN_NAME: &str = "embedded";

/// Receives events handed off by the pipeline in-process. Implementations
/// run on the pipeline's worker task, so slow callbacks apply backpressure
/// the same way a slow network sink would.
#[async_trait]
pub trait EventCallback: Send + Sync {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// A callback built from a plain closure, for hosts that don't need a
/// dedicated type.
pub struct FnCallback<F>(F);

impl<F> FnCallback<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> EventCallback for FnCallback<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

pub struct EmbeddedOutputPlugin {
    callback: Arc<dyn EventCallback>,
    inbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl EmbeddedOutputPlugin {
    pub fn new(callback: Arc<dyn EventCallback>) -> Self {
        Self {
            callback,
            inbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: Arc::new(RestartableErrorChannel::new(4)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// No options are needed to construct this plugin from configuration
    /// alone — a host must supply the callback programmatically via
    /// [`EmbeddedOutputPlugin::new`], so the registry factory refuses to
    /// build one from options, same as the chain-sync and mempool inputs.
    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Output,
            name: PLUGIN_NAME.to_string(),
            description: "In-process callback delivery sink for library embedding".to_string(),
            options: vec![OptionSpec::new(
                "placeholder",
                OptionType::Bool,
                OptionValue::Bool(false),
            )
            .with_description("unused; this plugin must be constructed with EmbeddedOutputPlugin::new")],
            factory: Arc::new(|_options| {
                Err(ConfigError::InvalidOption {
                    option: "embedded".to_string(),
                    reason: "the embedded output has no registry factory; construct it with EmbeddedOutputPlugin::new and register it directly".to_string(),
                }
                .into())
            }),
        }
    }
}

#[async_trait]
impl HealthCheck for EmbeddedOutputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for EmbeddedOutputPlugin {}

#[async_trait]
impl Plugin for EmbeddedOutputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn description(&self) -> &str {
        "Embedded callback output"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.inbound.reset().await;
        self.errors.reset().await;

        let mut inbound_rx = self.inbound.take_receiver().await.expect("reset channel has a receiver");
        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let callback = self.callback.clone();
        let errors = self.errors.clone();
        let worker_shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { return };
                        if let Err(e) = callback.on_event(&event).await {
                            warn!(error = %e, "embedded callback returned an error");
                            errors.publish(PluginError::DeliveryFailed(e.to_string())).await;
                        }
                    }
                }
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "embedded output started");
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
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_common::payload::{EventPayload, RollbackPayload};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct RecordingCallback {
        seen: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl EventCallback for RecordingCallback {
        async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.event_type.clone());
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event::new(
            "chainsync.block",
            chrono::Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload { block_hash: "bh".to_string(), slot_number: 1 }),
        )
    }

    #[tokio::test]
    async fn forwards_events_to_callback() {
        let callback = Arc::new(RecordingCallback { seen: StdMutex::new(Vec::new()) });
        let plugin = EmbeddedOutputPlugin::new(callback.clone());
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        tx.send(sample_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        plugin.stop().await.unwrap();

        assert_eq!(callback.seen.lock().unwrap().as_slice(), ["chainsync.block"]);
    }

    #[tokio::test]
    async fn callback_error_is_published_without_stopping_worker() {
        struct FailingCallback;
        #[async_trait]
        impl EventCallback for FailingCallback {
            async fn on_event(&self, _event: &Event) -> anyhow::Result<()> {
                anyhow::bail!("host callback failed")
            }
        }

        let plugin = EmbeddedOutputPlugin::new(Arc::new(FailingCallback));
        plugin.start().await.unwrap();
        let mut errors = plugin.take_error_chan().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        tx.send(sample_event()).await.unwrap();

        let err = tokio::time::timeout(Duration::from_millis(200), errors.recv()).await.unwrap();
        assert!(err.is_some());
        plugin.stop().await.unwrap();
    }

    #[test]
    fn registry_factory_refuses_to_build_without_a_callback() {
        let entry = EmbeddedOutputPlugin::registry_entry();
        let options = relay_pipeline::ResolvedOptions::default();
        assert!((entry.factory)(options).is_err());
    }
}

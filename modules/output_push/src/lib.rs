//! Push output plugin: delivers each event as the `data` payload of an
//! FCM-shaped push notification, authenticated with a server key header,
//! with the same retry-with-backoff discipline as the other HTTP sinks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_common::{ConfigError, Event, PluginError};
use relay_pipeline::{
    retry_with_backoff, ApiRouteRegistrar, BackoffConfig, HealthCheck, OptionSpec, OptionType,
    OptionValue, Plugin, PluginEntry, PluginKind, RestartableErrorChannel, RestartableEventChannel,
    ShutdownSignal, STAGE_CHANNEL_CAPACITY,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const PLUGIN_NAME: &str = "push";
const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com/fcm/send";

#[async_trait]
pub trait PushSink: Send + Sync {
    async fn push(&self, data: &serde_json::Value) -> anyhow::Result<()>;
}

pub struct HttpPushSink {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
    device_token: String,
}

impl HttpPushSink {
    pub fn new(endpoint: String, server_key: String, device_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, endpoint, server_key, device_token })
    }
}

#[async_trait]
impl PushSink for HttpPushSink {
    async fn push(&self, data: &serde_json::Value) -> anyhow::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&serde_json::json!({
                "to": self.device_token,
                "data": data,
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("push endpoint returned status {}", response.status());
        }
        Ok(())
    }
}

pub struct PushOutputPlugin {
    sink: Arc<dyn PushSink>,
    backoff: BackoffConfig,
    inbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl PushOutputPlugin {
    pub fn new(sink: Arc<dyn PushSink>, backoff: BackoffConfig) -> Self {
        Self {
            sink,
            backoff,
            inbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: Arc::new(RestartableErrorChannel::new(4)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_options(options: relay_pipeline::ResolvedOptions) -> Result<Self, ConfigError> {
        let server_key = options.string("server-key").unwrap_or_default();
        if server_key.is_empty() {
            return Err(ConfigError::MissingOption("server-key".to_string()));
        }
        let device_token = options.string("device-token").unwrap_or_default();
        if device_token.is_empty() {
            return Err(ConfigError::MissingOption("device-token".to_string()));
        }
        let endpoint = options.string("endpoint").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let timeout = Duration::from_secs(options.uint("timeout-seconds").unwrap_or(10));
        let sink = HttpPushSink::new(endpoint, server_key, device_token, timeout)
            .map_err(|e| ConfigError::InvalidOption { option: "endpoint".to_string(), reason: e.to_string() })?;

        let mut backoff = BackoffConfig::default();
        if let Some(attempts) = options.uint("max-attempts") {
            backoff.max_attempts = attempts as u32;
        }

        Ok(Self::new(Arc::new(sink), backoff))
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Output,
            name: PLUGIN_NAME.to_string(),
            description: "FCM-shaped push notification delivery sink".to_string(),
            options: vec![
                OptionSpec::new("server-key", OptionType::String, OptionValue::String(String::new()))
                    .with_description("FCM server key (required)"),
                OptionSpec::new("device-token", OptionType::String, OptionValue::String(String::new()))
                    .with_description("Destination device registration token (required)"),
                OptionSpec::new("endpoint", OptionType::String, OptionValue::String(DEFAULT_ENDPOINT.to_string()))
                    .with_description("Push endpoint URL"),
                OptionSpec::new("timeout-seconds", OptionType::Uint, OptionValue::Uint(10))
                    .with_description("Per-request timeout"),
                OptionSpec::new("max-attempts", OptionType::Uint, OptionValue::Uint(3))
                    .with_description("Delivery attempts before giving up"),
            ],
            factory: Arc::new(|options| Ok(Box::new(PushOutputPlugin::from_options(options)?) as Box<dyn Plugin>)),
        }
    }
}

#[async_trait]
impl HealthCheck for PushOutputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for PushOutputPlugin {}

#[async_trait]
impl Plugin for PushOutputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn description(&self) -> &str {
        "Push notification output"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.inbound.reset().await;
        self.errors.reset().await;

        let mut inbound_rx = self.inbound.take_receiver().await.expect("reset channel has a receiver");
        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let sink = self.sink.clone();
        let backoff = self.backoff;
        let errors = self.errors.clone();
        let worker_shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { return };
                        let data = match event.to_json() {
                            Ok(data) => data,
                            Err(e) => {
                                errors.publish(PluginError::Data(e.to_string())).await;
                                continue;
                            }
                        };
                        tokio::select! {
                            _ = worker_shutdown.signalled() => return,
                            result = retry_with_backoff(&backoff, || sink.push(&data)) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "push delivery exhausted retries");
                                    errors.publish(PluginError::DeliveryFailed(e.to_string())).await;
                                }
                            }
                        }
                    }
                }
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "push output started");
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

    struct RecordingSink {
        calls: std::sync::Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl PushSink for RecordingSink {
        async fn push(&self, data: &serde_json::Value) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(data.clone());
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event::new(
            "mempool.transaction",
            chrono::Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload { block_hash: "bh".to_string(), slot_number: 7 }),
        )
    }

    #[tokio::test]
    async fn delivers_event_json_as_data_payload() {
        let sink = Arc::new(RecordingSink { calls: std::sync::Mutex::new(Vec::new()) });
        let plugin = PushOutputPlugin::new(sink.clone(), BackoffConfig::default());
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        tx.send(sample_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        plugin.stop().await.unwrap();

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["type"], "mempool.transaction");
    }

    #[test]
    fn missing_server_key_is_a_config_error() {
        let options = relay_pipeline::ResolvedOptions::default();
        assert!(PushOutputPlugin::from_options(options).is_err());
    }
}

//! Webhook output plugin: POSTs the flat wire JSON of each event to a
//! configured HTTP endpoint, retrying failed deliveries with exponential
//! backoff before surfacing a non-blocking error (spec §4.9).
//!
//! The actual HTTP call is behind a [`WebhookSink`] trait — an external
//! collaborator per spec §1 ("downstream wire clients ... seen only as
//! 'deliver bytes, maybe retry'") — so tests exercise the retry/backoff
//! and lifecycle logic without a real server, mirroring the
//! `ChainSyncSource`/`MempoolSource` externalization used by the inputs.

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

pub const PLUGIN_NAME: &str = "webhook";

/// The narrow "deliver this body" interface a webhook sink implements.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn deliver(&self, body: &serde_json::Value) -> anyhow::Result<()>;
}

/// A real HTTP POST to a configured URL, with an optional single auth
/// header (e.g. `Authorization: Bearer <token>`).
pub struct HttpWebhookSink {
    client: reqwest::Client,
    url: String,
    auth_header: Option<(String, String)>,
}

impl HttpWebhookSink {
    pub fn new(url: String, auth_header: Option<(String, String)>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url, auth_header })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn deliver(&self, body: &serde_json::Value) -> anyhow::Result<()> {
        let mut request = self.client.post(&self.url).json(body);
        if let Some((name, value)) = &self.auth_header {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook endpoint returned status {}", response.status());
        }
        Ok(())
    }
}

pub struct WebhookOutputPlugin {
    sink: Arc<dyn WebhookSink>,
    backoff: BackoffConfig,
    inbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl WebhookOutputPlugin {
    pub fn new(sink: Arc<dyn WebhookSink>, backoff: BackoffConfig) -> Self {
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
        let url = options.string("url").unwrap_or_default();
        if url.is_empty() {
            return Err(ConfigError::MissingOption("url".to_string()));
        }
        let auth_header_value = options.string("auth-header-value").unwrap_or_default();
        let auth_header = if auth_header_value.is_empty() {
            None
        } else {
            let name = options.string("auth-header-name").unwrap_or_else(|| "Authorization".to_string());
            Some((name, auth_header_value))
        };
        let timeout = Duration::from_secs(options.uint("timeout-seconds").unwrap_or(10));
        let sink = HttpWebhookSink::new(url, auth_header, timeout)
            .map_err(|e| ConfigError::InvalidOption { option: "url".to_string(), reason: e.to_string() })?;

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
            description: "HTTP webhook delivery sink".to_string(),
            options: vec![
                OptionSpec::new("url", OptionType::String, OptionValue::String(String::new()))
                    .with_description("Webhook endpoint URL (required)"),
                OptionSpec::new("auth-header-name", OptionType::String, OptionValue::String("Authorization".to_string()))
                    .with_description("Header name carrying the auth credential"),
                OptionSpec::new("auth-header-value", OptionType::String, OptionValue::String(String::new()))
                    .with_description("Header value, e.g. 'Bearer <token>'; unset disables auth"),
                OptionSpec::new("timeout-seconds", OptionType::Uint, OptionValue::Uint(10))
                    .with_description("Per-request timeout"),
                OptionSpec::new("max-attempts", OptionType::Uint, OptionValue::Uint(3))
                    .with_description("Delivery attempts before giving up"),
            ],
            factory: Arc::new(|options| Ok(Box::new(WebhookOutputPlugin::from_options(options)?) as Box<dyn Plugin>)),
        }
    }
}

#[async_trait]
impl HealthCheck for WebhookOutputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for WebhookOutputPlugin {}

#[async_trait]
impl Plugin for WebhookOutputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn description(&self) -> &str {
        "Webhook output"
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
                        let body = match event.to_json() {
                            Ok(body) => body,
                            Err(e) => {
                                errors.publish(PluginError::Data(e.to_string())).await;
                                continue;
                            }
                        };
                        tokio::select! {
                            _ = worker_shutdown.signalled() => return,
                            result = retry_with_backoff(&backoff, || sink.deliver(&body)) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "webhook delivery exhausted retries");
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
        info!(plugin = PLUGIN_NAME, "webhook output started");
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
    use std::sync::atomic::AtomicU32;

    struct CountingSink {
        attempts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl WebhookSink for CountingSink {
        async fn deliver(&self, _body: &serde_json::Value) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                anyhow::bail!("simulated failure");
            }
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event::new(
            "chainsync.rollback",
            chrono::Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload { block_hash: "bh".to_string(), slot_number: 1 }),
        )
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let sink = Arc::new(CountingSink { attempts: AtomicU32::new(0), fail_first: 2 });
        let plugin = WebhookOutputPlugin::new(sink.clone(), fast_backoff());
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        let mut errors = plugin.take_error_chan().await.unwrap();

        tx.send(sample_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        plugin.stop().await.unwrap();

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 3);
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn publishes_error_after_exhausting_retries() {
        let sink = Arc::new(CountingSink { attempts: AtomicU32::new(0), fail_first: u32::MAX });
        let plugin = WebhookOutputPlugin::new(sink, fast_backoff());
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        let mut errors = plugin.take_error_chan().await.unwrap();

        tx.send(sample_event()).await.unwrap();
        let error = tokio::time::timeout(Duration::from_secs(1), errors.recv()).await.unwrap();
        assert!(matches!(error, Some(PluginError::DeliveryFailed(_))));

        plugin.stop().await.unwrap();
    }

    #[test]
    fn missing_url_is_a_config_error() {
        let options = relay_pipeline::ResolvedOptions::default();
        assert!(WebhookOutputPlugin::from_options(options).is_err());
    }
}

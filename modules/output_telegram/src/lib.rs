//! Telegram output plugin: formats each event as a text message and
//! delivers it via the Telegram Bot API's `sendMessage` endpoint, with
//! the same retry-with-backoff discipline as the webhook output.

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

pub const PLUGIN_NAME: &str = "telegram";

/// Formats an event into the text body of a Telegram message.
pub fn format_message(event: &Event) -> String {
    format!("*{}*\n`{}`", event.event_type, event.timestamp.to_rfc3339())
}

#[async_trait]
pub trait TelegramSink: Send + Sync {
    async fn send_message(&self, text: &str) -> anyhow::Result<()>;
}

pub struct HttpTelegramSink {
    client: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl HttpTelegramSink {
    pub fn new(bot_token: String, chat_id: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, bot_token, chat_id })
    }
}

#[async_trait]
impl TelegramSink for HttpTelegramSink {
    async fn send_message(&self, text: &str) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("telegram API returned status {}", response.status());
        }
        Ok(())
    }
}

pub struct TelegramOutputPlugin {
    sink: Arc<dyn TelegramSink>,
    backoff: BackoffConfig,
    inbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl TelegramOutputPlugin {
    pub fn new(sink: Arc<dyn TelegramSink>, backoff: BackoffConfig) -> Self {
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
        let bot_token = options.string("bot-token").unwrap_or_default();
        if bot_token.is_empty() {
            return Err(ConfigError::MissingOption("bot-token".to_string()));
        }
        let chat_id = options.string("chat-id").unwrap_or_default();
        if chat_id.is_empty() {
            return Err(ConfigError::MissingOption("chat-id".to_string()));
        }
        let timeout = Duration::from_secs(options.uint("timeout-seconds").unwrap_or(10));
        let sink = HttpTelegramSink::new(bot_token, chat_id, timeout)
            .map_err(|e| ConfigError::InvalidOption { option: "bot-token".to_string(), reason: e.to_string() })?;

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
            description: "Telegram Bot API delivery sink".to_string(),
            options: vec![
                OptionSpec::new("bot-token", OptionType::String, OptionValue::String(String::new()))
                    .with_description("Telegram bot token (required)"),
                OptionSpec::new("chat-id", OptionType::String, OptionValue::String(String::new()))
                    .with_description("Destination chat ID (required)"),
                OptionSpec::new("timeout-seconds", OptionType::Uint, OptionValue::Uint(10))
                    .with_description("Per-request timeout"),
                OptionSpec::new("max-attempts", OptionType::Uint, OptionValue::Uint(3))
                    .with_description("Delivery attempts before giving up"),
            ],
            factory: Arc::new(|options| Ok(Box::new(TelegramOutputPlugin::from_options(options)?) as Box<dyn Plugin>)),
        }
    }
}

#[async_trait]
impl HealthCheck for TelegramOutputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for TelegramOutputPlugin {}

#[async_trait]
impl Plugin for TelegramOutputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn description(&self) -> &str {
        "Telegram output"
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
                        let text = format_message(&event);
                        tokio::select! {
                            _ = worker_shutdown.signalled() => return,
                            result = retry_with_backoff(&backoff, || sink.send_message(&text)) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "telegram delivery exhausted retries");
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
        info!(plugin = PLUGIN_NAME, "telegram output started");
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
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        messages: StdMutex<Vec<String>>,
        attempts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl TelegramSink for RecordingSink {
        async fn send_message(&self, text: &str) -> anyhow::Result<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_first {
                anyhow::bail!("simulated failure");
            }
            self.messages.lock().unwrap().push(text.to_string());
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

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn delivers_formatted_message() {
        let sink = Arc::new(RecordingSink {
            messages: StdMutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            fail_first: 0,
        });
        let plugin = TelegramOutputPlugin::new(sink.clone(), fast_backoff());
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        tx.send(sample_event()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        plugin.stop().await.unwrap();

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("chainsync.block"));
    }

    #[test]
    fn missing_bot_token_is_a_config_error() {
        let options = relay_pipeline::ResolvedOptions::default();
        assert!(TelegramOutputPlugin::from_options(options).is_err());
    }
}

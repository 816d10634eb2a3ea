//! Log output plugin: formats and writes events to stdout, as either
//! human-readable text or newline-delimited JSON (spec §4.9/§2).

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

pub const PLUGIN_NAME: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw {
            "json" | "ndjson" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Where a formatted line goes. The default writes to the process's real
/// stdout; tests substitute a capturing sink so assertions don't depend on
/// scraping the test runner's own output stream.
pub trait LineSink: Send + Sync {
    fn write_line(&self, line: &str);
}

pub struct StdoutSink;

impl LineSink for StdoutSink {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

fn format_text(event: &Event) -> String {
    format!("[{}] {}", event.timestamp.to_rfc3339(), event.event_type)
}

pub struct LogOutputPlugin {
    format: LogFormat,
    sink: Arc<dyn LineSink>,
    inbound: RestartableEventChannel,
    errors: Arc<RestartableErrorChannel>,
    shutdown: Mutex<Option<ShutdownSignal>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl LogOutputPlugin {
    pub fn new(format: LogFormat) -> Self {
        Self::with_sink(format, Arc::new(StdoutSink))
    }

    pub fn with_sink(format: LogFormat, sink: Arc<dyn LineSink>) -> Self {
        Self {
            format,
            sink,
            inbound: RestartableEventChannel::new(STAGE_CHANNEL_CAPACITY),
            errors: Arc::new(RestartableErrorChannel::new(4)),
            shutdown: Mutex::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn from_options(options: relay_pipeline::ResolvedOptions) -> Self {
        let format = LogFormat::parse(&options.string("format").unwrap_or_else(|| "text".to_string()));
        Self::new(format)
    }

    pub fn registry_entry() -> PluginEntry {
        PluginEntry {
            kind: PluginKind::Output,
            name: PLUGIN_NAME.to_string(),
            description: "Writes events to stdout as text or NDJSON".to_string(),
            options: vec![OptionSpec::new(
                "format",
                OptionType::String,
                OptionValue::String("text".to_string()),
            )
            .with_description("Output format: 'text' or 'json'")],
            factory: Arc::new(|options| Ok(Box::new(LogOutputPlugin::from_options(options)) as Box<dyn Plugin>)),
        }
    }
}

#[async_trait]
impl HealthCheck for LogOutputPlugin {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl ApiRouteRegistrar for LogOutputPlugin {}

#[async_trait]
impl Plugin for LogOutputPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Output
    }

    fn description(&self) -> &str {
        "Log output (stdout, text or NDJSON)"
    }

    async fn start(&self) -> anyhow::Result<()> {
        self.inbound.reset().await;
        self.errors.reset().await;

        let mut inbound_rx = self.inbound.take_receiver().await.expect("reset channel has a receiver");
        let shutdown = ShutdownSignal::new();
        *self.shutdown.lock().await = Some(shutdown.clone());

        let format = self.format;
        let sink = self.sink.clone();
        let errors = self.errors.clone();
        let worker_shutdown = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_shutdown.signalled() => return,
                    event = inbound_rx.recv() => {
                        let Some(event) = event else { return };
                        let line = match format {
                            LogFormat::Text => format_text(&event),
                            LogFormat::Json => match event.to_json_string() {
                                Ok(json) => json,
                                Err(e) => {
                                    errors.publish(PluginError::Data(e.to_string())).await;
                                    continue;
                                }
                            },
                        };
                        sink.write_line(&line);
                    }
                }
            }
        });

        *self.worker.lock().await = Some(handle);
        self.running.store(true, Ordering::SeqCst);
        info!(plugin = PLUGIN_NAME, "log output started");
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

    struct CapturingSink {
        lines: Arc<StdMutex<Vec<String>>>,
    }

    impl LineSink for CapturingSink {
        fn write_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
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

    #[tokio::test]
    async fn json_format_writes_flat_event_json() {
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let plugin = LogOutputPlugin::with_sink(LogFormat::Json, Arc::new(CapturingSink { lines: lines.clone() }));
        plugin.start().await.unwrap();
        let tx = plugin.input_chan().await.unwrap();
        tx.send(sample_event()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        plugin.stop().await.unwrap();

        let captured = lines.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&captured[0]).unwrap();
        assert_eq!(parsed["type"], "chainsync.rollback");
    }

    #[tokio::test]
    async fn double_stop_is_a_noop() {
        let plugin = LogOutputPlugin::new(LogFormat::Text);
        plugin.start().await.unwrap();
        plugin.stop().await.unwrap();
        plugin.stop().await.unwrap();
    }
}

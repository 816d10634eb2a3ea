//! The pipeline orchestrator: wires input, filter, and output plugins
//! together with copy-loops, drives the Start/Stop lifecycle protocol, and
//! aggregates every plugin's errors onto one channel.
//!
//! Grounded on the `select! { new_tx = ..., request = ... }` worker loop in
//! `tx_submitter/src/peer.rs` and the `mpsc`-based wiring in
//! `peer_network_interface`, generalized to an arbitrary chain of stages
//! instead of one fixed worker.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use relay_common::{Event, PipelineError, PluginError};

use crate::channel::ShutdownSignal;
use crate::health::HealthRegistry;
use crate::plugin::Plugin;

/// Capacity of every inter-stage and error-aggregation channel (spec's
/// bounded-backpressure default).
pub const STAGE_CHANNEL_CAPACITY: usize = 10;

struct State {
    shutdown: Option<ShutdownSignal>,
    tasks: Vec<JoinHandle<()>>,
    error_rx: Option<mpsc::Receiver<PluginError>>,
    running: bool,
    stopped_forever: bool,
}

/// Assembles input/filter/output plugins into a running stream and owns
/// their lifecycle. A `Pipeline` is single-use: once stopped it refuses to
/// start again (`PipelineError::AlreadyStopped`) — the daemon constructs a
/// fresh one per run. Individual plugins are restart-safe; the pipeline's
/// own Start/Stop protocol is not.
pub struct Pipeline {
    inputs: Vec<Arc<dyn Plugin>>,
    filters: Vec<Arc<dyn Plugin>>,
    outputs: Vec<Arc<dyn Plugin>>,
    health: Arc<HealthRegistry>,
    state: Mutex<State>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            filters: Vec::new(),
            outputs: Vec::new(),
            health: Arc::new(HealthRegistry::new()),
            state: Mutex::new(State {
                shutdown: None,
                tasks: Vec::new(),
                error_rx: None,
                running: false,
                stopped_forever: false,
            }),
        }
    }

    pub fn add_input(&mut self, plugin: Arc<dyn Plugin>) {
        self.inputs.push(plugin);
    }

    pub fn add_filter(&mut self, plugin: Arc<dyn Plugin>) {
        self.filters.push(plugin);
    }

    pub fn add_output(&mut self, plugin: Arc<dyn Plugin>) {
        self.outputs.push(plugin);
    }

    pub fn health(&self) -> Arc<HealthRegistry> {
        self.health.clone()
    }

    fn all_plugins(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.inputs.iter().chain(self.filters.iter()).chain(self.outputs.iter())
    }

    /// Start every plugin, wire copy-loops between stages in declaration
    /// order (inputs -> filters, in the order added -> outputs), and
    /// spawn a fan-out loop feeding every output plugin the same sequence.
    pub async fn start(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.stopped_forever {
            anyhow::bail!(PipelineError::AlreadyStopped);
        }
        if state.running {
            return Ok(());
        }

        let shutdown = ShutdownSignal::new();
        let (error_tx, error_rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
        let mut tasks = Vec::new();
        let mut start_err = None;

        // Start every stage first. A failure aborts further starts, but
        // whatever already started is committed to `state` below so that
        // `stop()` can clean it up — per the Start protocol, a failure
        // must leave previously-started stages to be torn down by Stop,
        // not abandoned mid-flight.
        for plugin in self.all_plugins() {
            match plugin.start().await {
                Ok(()) => {
                    self.health
                        .track(format!("{}:{}", plugin.kind(), plugin.name()), plugin.clone())
                        .await;
                    if let Some(rx) = plugin.take_error_chan().await {
                        tasks.push(tokio::spawn(forward_errors(rx, error_tx.clone(), shutdown.clone())));
                    }
                }
                Err(e) => {
                    start_err = Some(PipelineError::StartFailed(plugin.name().to_string(), e.to_string()));
                    break;
                }
            }
        }
        drop(error_tx);

        if start_err.is_none() {
            let mut input_receivers: Vec<mpsc::Receiver<Event>> = Vec::new();
            for input in &self.inputs {
                if let Some(rx) = input.take_output_chan().await {
                    input_receivers.push(rx);
                }
            }
            // Every input's output feeds one shared channel, regardless of
            // how many inputs are registered, so there is exactly one
            // sequence of events flowing into the filter chain (or straight
            // to the outputs, with zero filters) — never one independent
            // stream per input racing the others into the outputs.
            let mut stage_rx = merge_receivers(input_receivers, &shutdown, &mut tasks);

            for filter in &self.filters {
                let Some(filter_in) = filter.input_chan().await else {
                    continue;
                };
                if let Some(rx) = stage_rx.take() {
                    tasks.push(tokio::spawn(copy_loop(rx, filter_in.clone(), shutdown.clone())));
                }
                stage_rx = filter.take_output_chan().await;
            }

            let mut output_senders = Vec::new();
            for output in &self.outputs {
                if let Some(tx) = output.input_chan().await {
                    output_senders.push(tx);
                }
            }
            if let Some(rx) = stage_rx {
                tasks.push(tokio::spawn(fanout_loop(rx, output_senders.clone(), shutdown.clone())));
            }
        }

        state.shutdown = Some(shutdown);
        state.tasks = tasks;
        state.error_rx = Some(error_rx);
        state.running = true;

        match start_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Signal every copy-loop to unwind, wait for them, then stop every
    /// plugin in turn. Idempotent: calling `stop()` again after success
    /// returns `Ok(())` without touching anything.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.running {
            state.stopped_forever = true;
            return Ok(());
        }

        if let Some(shutdown) = state.shutdown.take() {
            shutdown.signal();
        }
        for task in state.tasks.drain(..) {
            let _ = task.await;
        }

        let mut failures = Vec::new();
        for plugin in self.all_plugins() {
            if let Err(e) = plugin.stop().await {
                failures.push(format!("{}: {e}", plugin.name()));
            }
        }
        self.health.untrack_all().await;

        state.error_rx = None;
        state.running = false;
        state.stopped_forever = true;

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("plugin(s) failed to stop cleanly: {}", failures.join("; "))
        }
    }

    /// Take the aggregated error receiver. `None` before the first
    /// `start()`, after `stop()`, or if already taken this run.
    pub async fn take_error_chan(&self) -> Option<mpsc::Receiver<PluginError>> {
        self.state.lock().await.error_rx.take()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse zero or more stage receivers into a single receiver. With zero
/// or one, no task is spawned — the lone receiver (if any) is handed back
/// directly. With two or more, a copy-loop is spawned per receiver feeding
/// one shared channel, so whatever stage reads the result sees one merged,
/// order-preserving-per-source sequence instead of racing independently
/// against every other source.
fn merge_receivers(
    mut receivers: Vec<mpsc::Receiver<Event>>,
    shutdown: &ShutdownSignal,
    tasks: &mut Vec<JoinHandle<()>>,
) -> Option<mpsc::Receiver<Event>> {
    if receivers.len() <= 1 {
        return receivers.pop();
    }
    let (tx, rx) = mpsc::channel(STAGE_CHANNEL_CAPACITY);
    for receiver in receivers {
        tasks.push(tokio::spawn(copy_loop(receiver, tx.clone(), shutdown.clone())));
    }
    Some(rx)
}

/// Drain `rx` into `tx`, selecting on the done-signal at both the receive
/// and the send so a blocked send during shutdown never hangs the loop.
async fn copy_loop(mut rx: mpsc::Receiver<Event>, tx: mpsc::Sender<Event>, shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            _ = shutdown.signalled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                tokio::select! {
                    _ = shutdown.signalled() => return,
                    result = tx.send(event) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Send every event from `rx` to every sender in `outputs`, preserving
/// order: each output sees the full sequence before the next event is
/// drained, so sinks never observe events out of order relative to one
/// another.
async fn fanout_loop(mut rx: mpsc::Receiver<Event>, outputs: Vec<mpsc::Sender<Event>>, shutdown: ShutdownSignal) {
    loop {
        tokio::select! {
            _ = shutdown.signalled() => return,
            event = rx.recv() => {
                let Some(event) = event else { return };
                for output in &outputs {
                    tokio::select! {
                        _ = shutdown.signalled() => return,
                        result = output.send(event.clone()) => {
                            let _ = result;
                        }
                    }
                }
            }
        }
    }
}

async fn forward_errors(
    mut rx: mpsc::Receiver<PluginError>,
    tx: mpsc::Sender<PluginError>,
    shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            _ = shutdown.signalled() => return,
            error = rx.recv() => {
                let Some(error) = error else { return };
                if tx.send(error).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventChannel;
    use crate::plugin::{ApiRouteRegistrar, HealthCheck, PluginKind};
    use async_trait::async_trait;
    use chrono::Utc;
    use relay_common::payload::{EventPayload, RollbackPayload};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    fn sample_event(slot: u64) -> Event {
        Event::new(
            "chainsync.rollback",
            Utc::now(),
            None,
            EventPayload::Rollback(RollbackPayload {
                block_hash: "deadbeef".to_string(),
                slot_number: slot,
            }),
        )
    }

    struct SourcePlugin {
        channel: EventChannel,
        running: AtomicBool,
        count: u64,
    }

    impl SourcePlugin {
        fn new(count: u64) -> Self {
            Self {
                channel: EventChannel::new(STAGE_CHANNEL_CAPACITY),
                running: AtomicBool::new(false),
                count,
            }
        }
    }

    #[async_trait]
    impl HealthCheck for SourcePlugin {
        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }
    impl ApiRouteRegistrar for SourcePlugin {}

    #[async_trait]
    impl Plugin for SourcePlugin {
        fn name(&self) -> &str {
            "test-source"
        }
        fn kind(&self) -> PluginKind {
            PluginKind::Input
        }
        async fn start(&self) -> anyhow::Result<()> {
            self.running.store(true, Ordering::SeqCst);
            let sender = self.channel.sender();
            for slot in 0..self.count {
                let _ = sender.send(sample_event(slot)).await;
            }
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn take_error_chan(&self) -> Option<mpsc::Receiver<PluginError>> {
            None
        }
        async fn input_chan(&self) -> Option<mpsc::Sender<Event>> {
            None
        }
        async fn take_output_chan(&self) -> Option<mpsc::Receiver<Event>> {
            self.channel.take_receiver().await
        }
    }

    struct SinkPlugin {
        channel: EventChannel,
        received: Arc<StdMutex<Vec<Event>>>,
        running: AtomicBool,
    }

    impl SinkPlugin {
        fn new(received: Arc<StdMutex<Vec<Event>>>) -> Self {
            Self {
                channel: EventChannel::new(STAGE_CHANNEL_CAPACITY),
                received,
                running: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl HealthCheck for SinkPlugin {
        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }
    impl ApiRouteRegistrar for SinkPlugin {}

    #[async_trait]
    impl Plugin for SinkPlugin {
        fn name(&self) -> &str {
            "test-sink"
        }
        fn kind(&self) -> PluginKind {
            PluginKind::Output
        }
        async fn start(&self) -> anyhow::Result<()> {
            self.running.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn take_error_chan(&self) -> Option<mpsc::Receiver<PluginError>> {
            None
        }
        async fn input_chan(&self) -> Option<mpsc::Sender<Event>> {
            Some(self.channel.sender())
        }
        async fn take_output_chan(&self) -> Option<mpsc::Receiver<Event>> {
            None
        }
    }

    #[tokio::test]
    async fn events_flow_from_source_to_sink_in_order() {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.add_input(Arc::new(SourcePlugin::new(5)));
        let sink = Arc::new(SinkPlugin::new(received.clone()));
        pipeline.add_output(sink.clone());

        pipeline.start().await.unwrap();

        // Drain the sink's own channel directly; a real output plugin
        // would do this from inside its own `start()`.
        let mut rx = sink.channel.take_receiver().await.unwrap();
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            received.lock().unwrap().push(event);
        }

        pipeline.stop().await.unwrap();

        let collected = received.lock().unwrap();
        assert_eq!(collected.len(), 5);
        for (i, event) in collected.iter().enumerate() {
            if let EventPayload::Rollback(r) = &event.payload {
                assert_eq!(r.slot_number, i as u64);
            } else {
                panic!("unexpected payload");
            }
        }
    }

    #[tokio::test]
    async fn two_inputs_with_no_filters_merge_into_one_fanout_sequence() {
        let received = Arc::new(StdMutex::new(Vec::new()));
        let mut pipeline = Pipeline::new();
        pipeline.add_input(Arc::new(SourcePlugin::new(5)));
        pipeline.add_input(Arc::new(SourcePlugin::new(5)));
        let sink = Arc::new(SinkPlugin::new(received.clone()));
        pipeline.add_output(sink.clone());

        pipeline.start().await.unwrap();

        let mut rx = sink.channel.take_receiver().await.unwrap();
        for _ in 0..10 {
            let event = rx.recv().await.unwrap();
            received.lock().unwrap().push(event);
        }

        pipeline.stop().await.unwrap();

        // Both inputs' events reach the single sink through one merged
        // fan-out loop rather than two independently racing loops.
        assert_eq!(received.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn stop_before_start_is_a_noop() {
        let pipeline = Pipeline::new();
        pipeline.stop().await.unwrap();
        assert!(pipeline.start().await.is_err());
    }
}

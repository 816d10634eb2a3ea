//! Channel primitives shared by every plugin: the sender/receiver pair a
//! plugin hands to the pipeline at `start()`, and the done-signal the
//! pipeline uses to unwind every copy-loop on `stop()`.

use relay_common::Event;
use tokio::sync::{mpsc, watch, Mutex};

/// An event channel a plugin owns. The sender is cheaply cloned and kept
/// by the plugin for its own producer task; the receiver is handed to the
/// pipeline exactly once, via [`EventChannel::take_receiver`].
pub struct EventChannel {
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.sender.clone()
    }

    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<Event>> {
        self.receiver.lock().await.take()
    }
}

/// An error channel a plugin owns, sized small since errors are rare and
/// the plugin drops one on send failure rather than blocking (spec's
/// error-on-drop decision, see DESIGN.md).
pub struct ErrorChannel {
    sender: mpsc::Sender<relay_common::PluginError>,
    receiver: Mutex<Option<mpsc::Receiver<relay_common::PluginError>>>,
}

impl ErrorChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Publish an error without blocking the caller; dropped silently if
    /// the channel is full or has no reader attached.
    pub fn publish(&self, error: relay_common::PluginError) {
        let _ = self.sender.try_send(error);
    }

    pub fn sender(&self) -> mpsc::Sender<relay_common::PluginError> {
        self.sender.clone()
    }

    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<relay_common::PluginError>> {
        self.receiver.lock().await.take()
    }
}

/// An [`EventChannel`] that can be torn down and recreated across restart
/// cycles, so a plugin's `start()` after a prior `stop()` gets a fresh
/// channel pair rather than resuming (or sending into) a stale one —
/// the "channels are created by Start, closed by Stop, and re-created on
/// a subsequent Start" lifecycle.
pub struct RestartableEventChannel {
    inner: Mutex<Option<EventChannel>>,
    capacity: usize,
}

impl RestartableEventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(None),
            capacity,
        }
    }

    /// Allocate a fresh channel, discarding any previous one.
    pub async fn reset(&self) {
        *self.inner.lock().await = Some(EventChannel::new(self.capacity));
    }

    pub async fn sender(&self) -> Option<mpsc::Sender<Event>> {
        let guard = self.inner.lock().await;
        guard.as_ref().map(EventChannel::sender)
    }

    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<Event>> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(channel) => channel.take_receiver().await,
            None => None,
        }
    }

    pub async fn close(&self) {
        *self.inner.lock().await = None;
    }
}

/// An [`ErrorChannel`] that can be torn down and recreated across restart
/// cycles, mirroring [`RestartableEventChannel`].
pub struct RestartableErrorChannel {
    inner: Mutex<Option<ErrorChannel>>,
    capacity: usize,
}

impl RestartableErrorChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(None),
            capacity,
        }
    }

    pub async fn reset(&self) {
        *self.inner.lock().await = Some(ErrorChannel::new(self.capacity));
    }

    pub async fn publish(&self, error: relay_common::PluginError) {
        if let Some(channel) = self.inner.lock().await.as_ref() {
            channel.publish(error);
        }
    }

    /// A clone of the send end, for moving into a spawned worker task
    /// instead of borrowing the channel itself.
    pub async fn sender(&self) -> Option<mpsc::Sender<relay_common::PluginError>> {
        let guard = self.inner.lock().await;
        guard.as_ref().map(ErrorChannel::sender)
    }

    pub async fn take_receiver(&self) -> Option<mpsc::Receiver<relay_common::PluginError>> {
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some(channel) => channel.take_receiver().await,
            None => None,
        }
    }

    pub async fn close(&self) {
        *self.inner.lock().await = None;
    }
}

/// A broadcastable done-signal. Cloning shares the same underlying signal;
/// calling [`ShutdownSignal::signal`] on any clone wakes every task
/// awaiting [`ShutdownSignal::signalled`].
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn signal(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_signalled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once this signal has fired. Safe to await concurrently
    /// from many tasks and to call more than once.
    pub async fn signalled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

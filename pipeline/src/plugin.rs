//! The plugin contract every input, filter, and output stage implements.
//!
//! Mirrors the shape of `caryatid_sdk::Module`: a single trait object that
//! owns its own channels and lifecycle, registered once and driven by the
//! pipeline orchestrator. Unlike a pub/sub module, a `Plugin` here is wired
//! point-to-point — its channels are handed to the pipeline explicitly
//! rather than addressed by topic.

use async_trait::async_trait;
use axum::routing::MethodRouter;
use relay_common::{Event, PluginError};
use tokio::sync::mpsc;

/// Which position in the pipeline a plugin occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Input,
    Filter,
    Output,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Filter => "filter",
            Self::Output => "output",
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP route an output or input plugin wants exposed on the admin
/// façade. The façade itself (route dispatch, listener) is out of scope;
/// this is the collaboration point it consumes.
pub struct ApiRoute {
    pub path: String,
    pub method_router: MethodRouter,
}

/// Implemented by plugins that want to expose admin-façade routes (e.g. a
/// webhook output's delivery-stats endpoint).
pub trait ApiRouteRegistrar {
    fn api_routes(&self) -> Vec<ApiRoute> {
        Vec::new()
    }
}

/// Implemented by every plugin so the daemon can answer a liveness probe
/// per plugin, not just for the process as a whole.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_running(&self) -> bool;
}

/// A pipeline stage. `start`/`stop` must be idempotent and restart-safe:
/// a second `start()` after `stop()` recreates channels and resumes
/// producing/consuming, rather than erroring or silently doing nothing.
#[async_trait]
pub trait Plugin: HealthCheck + ApiRouteRegistrar + Send + Sync {
    /// Stable identifier used in config keys, CLI flags, and log fields.
    fn name(&self) -> &str;

    fn kind(&self) -> PluginKind;

    fn description(&self) -> &str {
        ""
    }

    /// Begin producing/consuming. Input plugins start pulling from their
    /// upstream source; output plugins start accepting events on their
    /// input channel; filters start pulling and pushing both.
    async fn start(&self) -> anyhow::Result<()>;

    /// Signal shutdown and wait for in-flight work to drain. Calling
    /// `stop()` twice in a row, or calling it when `start()` was never
    /// called (e.g. a sibling stage failed to start), is a no-op, not an
    /// error.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Take this plugin's error receiver. Returns `None` if already taken
    /// for the current `start()` cycle.
    async fn take_error_chan(&self) -> Option<mpsc::Receiver<PluginError>>;

    /// A clone of the sender half of this plugin's input channel. `None`
    /// for input plugins, which have no upstream stage inside the pipeline.
    async fn input_chan(&self) -> Option<mpsc::Sender<Event>>;

    /// Take this plugin's output receiver. `None` for output plugins,
    /// which have no downstream stage inside the pipeline, or if already
    /// taken for the current `start()` cycle.
    async fn take_output_chan(&self) -> Option<mpsc::Receiver<Event>>;
}

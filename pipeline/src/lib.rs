//! Plugin contract, registry, and pipeline orchestration shared by every
//! input, filter, and output crate.

pub mod channel;
pub mod health;
pub mod pipeline;
pub mod plugin;
pub mod registry;
pub mod retry;

pub use channel::{
    ErrorChannel, EventChannel, RestartableErrorChannel, RestartableEventChannel, ShutdownSignal,
};
pub use health::HealthRegistry;
pub use pipeline::{Pipeline, STAGE_CHANNEL_CAPACITY};
pub use plugin::{ApiRoute, ApiRouteRegistrar, HealthCheck, Plugin, PluginKind};
pub use registry::{
    OptionSpec, OptionType, OptionValue, PluginEntry, PluginFactory, Registry, ResolutionContext,
    ResolvedOptions,
};
pub use retry::{retry_with_backoff, BackoffConfig};

//! Error taxonomy shared by plugins and the pipeline core

use thiserror::Error;

/// Errors raised while validating or resolving a plugin's configuration.
/// Fatal at startup — never surfaced on an `ErrorChan`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("missing required option '{0}'")]
    MissingOption(String),

    #[error("invalid value for option '{option}': {reason}")]
    InvalidOption { option: String, reason: String },

    #[error("invalid bech32 string: {0}")]
    Bech32(String),

    #[error("invalid hex string: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Errors surfaced on a plugin's `ErrorChan` during normal operation.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("delivery failed after retries: {0}")]
    DeliveryFailed(String),

    #[error("data error: {0}")]
    Data(String),
}

/// Errors from the pipeline's own lifecycle protocol. Seeing one of these
/// in a well-behaved program indicates a bug in the assembly or lifecycle,
/// not an external failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot start a stopped pipeline")]
    AlreadyStopped,

    #[error("plugin '{0}' failed to start: {1}")]
    StartFailed(String, String),
}

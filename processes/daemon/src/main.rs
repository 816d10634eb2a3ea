//! 'main' for the relay daemon process: an all-inclusive binary that wires
//! one input, zero or more filters, and one or more outputs into a running
//! [`Pipeline`], following the CLI/env/config-file surface and admin-façade
//! collaboration points.

mod admin;
mod stdin_sources;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use relay_common::ConfigError;
use relay_pipeline::{ApiRoute, ApiRouteRegistrar, Pipeline, Plugin, PluginKind, Registry};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use stdin_sources::{StdinChainSyncSource, StdinMempoolSource};

#[derive(Debug, Parser)]
#[command(name = "relay_daemon", version, about = "Pluggable Cardano event-streaming daemon")]
struct Args {
    /// YAML configuration file.
    #[arg(long, value_name = "PATH", default_value = "relay.yaml")]
    config: String,

    /// Input plugin name, or `list` to print the available input plugins.
    #[arg(long, value_name = "NAME|list")]
    input: Option<String>,

    /// Output plugin name (repeatable for fan-out), or `list`.
    #[arg(long = "output", value_name = "NAME|list")]
    outputs: Vec<String>,

    /// Filter plugin name, applied in the order given (repeatable), or `list`.
    #[arg(long = "filter", value_name = "NAME|list")]
    filters: Vec<String>,

    /// Per-plugin option flags generated from each plugin's option schema,
    /// e.g. `--output-webhook-url https://example.com/hook`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    plugin_flags: Vec<String>,
}

/// Turns the trailing `--flag value` / `--flag` tokens into a lookup the
/// registry's option resolution can consult ahead of environment and
/// config-file values. A flag not followed by a value (or followed by
/// another flag) is treated as a boolean `true`, matching `OptionValue`'s
/// bool parsing.
fn parse_plugin_flags(raw: &[String]) -> HashMap<String, String> {
    let mut flags = HashMap::new();
    let mut i = 0;
    while i < raw.len() {
        let flag = &raw[i];
        if !flag.starts_with("--") {
            i += 1;
            continue;
        }
        match raw.get(i + 1) {
            Some(value) if !value.starts_with("--") => {
                flags.insert(flag.clone(), value.clone());
                i += 2;
            }
            _ => {
                flags.insert(flag.clone(), "true".to_string());
                i += 1;
            }
        }
    }
    flags
}

fn load_config(path: &str) -> Result<Config> {
    Ok(Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix("RELAY").separator("_"))
        .build()
        .context("loading configuration")?)
}

fn init_tracing(config: &Config) {
    let default_level = config.get_string("logging.level").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(env_filter).init();
}

/// Reads a YAML key that may be a single scalar or a sequence, so `output:
/// webhook` and `output: [webhook, log]` are both accepted.
fn config_string_list(config: &Config, key: &str) -> Vec<String> {
    if let Ok(list) = config.get::<Vec<String>>(key) {
        return list;
    }
    config.get_string(key).map(|s| vec![s]).unwrap_or_default()
}

fn build_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register(relay_filter_cardano::CardanoFilterPlugin::registry_entry());
    registry.register(relay_filter_event_type::EventTypeFilterPlugin::registry_entry());
    registry.register(relay_input_chain_sync::ChainSyncInputPlugin::registry_entry());
    registry.register(relay_input_mempool::MempoolInputPlugin::registry_entry());
    registry.register(relay_output_log::LogOutputPlugin::registry_entry());
    registry.register(relay_output_webhook::WebhookOutputPlugin::registry_entry());
    registry.register(relay_output_telegram::TelegramOutputPlugin::registry_entry());
    registry.register(relay_output_push::PushOutputPlugin::registry_entry());
    registry.register(relay_output_embedded::EmbeddedOutputPlugin::registry_entry());
    registry
}

fn print_list(registry: &Registry, kind: PluginKind) {
    println!("available {} plugins:", kind.as_str());
    for entry in registry.list(kind) {
        println!("  {:<14} {}", entry.name, entry.description);
    }
}

/// Builds the selected input plugin. `chain-sync` and `mempool` need a
/// concrete upstream source the registry factory can't supply on its own
/// (spec's upstream protocol clients are external collaborators), so this
/// binary wires them to a stdin NDJSON replay source; their declared
/// options are still resolved through the registry's normal CLI/env/config
/// precedence.
fn construct_input(
    registry: &Registry,
    name: &str,
    cli: &HashMap<String, String>,
    env: &HashMap<String, String>,
    config: Option<&Config>,
) -> Result<Arc<dyn Plugin>> {
    let entry = registry
        .find(PluginKind::Input, name)
        .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))?;

    match name {
        relay_input_chain_sync::PLUGIN_NAME => {
            let options = entry.resolve_options(cli, env, config)?;
            let confirmation_delay = options.uint("confirmation-delay").unwrap_or(0);
            let include_cbor = options.boolean("include-cbor").unwrap_or(false);
            let source: Box<dyn relay_input_chain_sync::source::ChainSyncSource> =
                Box::new(StdinChainSyncSource::new());
            Ok(Arc::new(relay_input_chain_sync::ChainSyncInputPlugin::new(
                source,
                confirmation_delay,
                include_cbor,
            )) as Arc<dyn Plugin>)
        }
        relay_input_mempool::PLUGIN_NAME => {
            let options = entry.resolve_options(cli, env, config)?;
            let poll_interval = Duration::from_secs(
                options
                    .uint("poll-interval-seconds")
                    .unwrap_or(relay_input_mempool::DEFAULT_POLL_INTERVAL_SECS),
            );
            let source: Box<dyn relay_input_mempool::source::MempoolSource> =
                Box::new(StdinMempoolSource::new());
            Ok(Arc::new(relay_input_mempool::MempoolInputPlugin::new(source, poll_interval)) as Arc<dyn Plugin>)
        }
        _ => Ok(Arc::from(registry.instantiate(PluginKind::Input, name, cli, env, config)?)),
    }
}

fn construct_output(
    registry: &Registry,
    name: &str,
    cli: &HashMap<String, String>,
    env: &HashMap<String, String>,
    config: Option<&Config>,
) -> Result<Arc<dyn Plugin>> {
    if name == relay_output_embedded::PLUGIN_NAME {
        anyhow::bail!(
            "the embedded output has no CLI/config construction path; embed relay_daemon as a \
             library and construct EmbeddedOutputPlugin with a callback directly"
        );
    }
    Ok(Arc::from(registry.instantiate(PluginKind::Output, name, cli, env, config)?))
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler, falling back to ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received ctrl-c");
    }
}

#[tokio::main]
pub async fn main() -> Result<()> {
    let args = Args::parse();
    let plugin_flags = parse_plugin_flags(&args.plugin_flags);
    let env_vars: HashMap<String, String> = std::env::vars().collect();

    let config = load_config(&args.config)?;
    init_tracing(&config);

    let registry = build_registry();

    if args.input.as_deref() == Some("list") {
        print_list(&registry, PluginKind::Input);
        return Ok(());
    }
    if args.outputs.iter().any(|o| o == "list") {
        print_list(&registry, PluginKind::Output);
        return Ok(());
    }
    if args.filters.iter().any(|f| f == "list") {
        print_list(&registry, PluginKind::Filter);
        return Ok(());
    }

    let input_name = args
        .input
        .clone()
        .or_else(|| config.get_string("input").ok())
        .ok_or_else(|| anyhow!("no input plugin selected; pass --input <name> or set `input` in the config file"))?;

    let output_names = if !args.outputs.is_empty() {
        args.outputs.clone()
    } else {
        config_string_list(&config, "output")
    };
    if output_names.is_empty() {
        return Err(anyhow!(
            "no output plugin selected; pass --output <name> or set `output` in the config file"
        ));
    }

    let filter_names = if !args.filters.is_empty() {
        args.filters.clone()
    } else {
        config_string_list(&config, "filters")
    };

    info!(input = %input_name, outputs = ?output_names, filters = ?filter_names, "assembling pipeline");

    let mut plugin_routes: Vec<ApiRoute> = Vec::new();

    let input_plugin = construct_input(&registry, &input_name, &plugin_flags, &env_vars, Some(&config))?;
    plugin_routes.extend(input_plugin.api_routes());

    let mut pipeline = Pipeline::new();
    pipeline.add_input(input_plugin);

    for name in &filter_names {
        let plugin: Arc<dyn Plugin> =
            Arc::from(registry.instantiate(PluginKind::Filter, name, &plugin_flags, &env_vars, Some(&config))?);
        plugin_routes.extend(plugin.api_routes());
        pipeline.add_filter(plugin);
    }

    for name in &output_names {
        let plugin = construct_output(&registry, name, &plugin_flags, &env_vars, Some(&config))?;
        plugin_routes.extend(plugin.api_routes());
        pipeline.add_output(plugin);
    }

    pipeline.start().await?;
    let health = pipeline.health();
    info!("pipeline started");

    let error_task = pipeline.take_error_chan().await.map(|mut rx| {
        tokio::spawn(async move {
            while let Some(err) = rx.recv().await {
                error!(%err, "plugin error");
            }
        })
    });

    let admin_addr: Option<SocketAddr> = {
        let address = config.get_string("api.address").unwrap_or_else(|_| "127.0.0.1".to_string());
        match config.get_int("api.port") {
            Ok(port) => Some(format!("{address}:{port}").parse().context("parsing api.address/api.port")?),
            Err(_) => None,
        }
    };

    let admin_task = match admin_addr {
        Some(addr) => {
            let router = admin::build_router(health, plugin_routes);
            Some(tokio::spawn(async move {
                if let Err(e) = admin::serve(addr, router).await {
                    error!(error = %e, "admin façade stopped unexpectedly");
                }
            }))
        }
        None => None,
    };

    wait_for_shutdown_signal().await;

    info!("shutting down");
    pipeline.stop().await?;
    if let Some(task) = admin_task {
        task.abort();
    }
    if let Some(task) = error_task {
        task.abort();
    }

    info!("exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plugin_flags_pairs_flag_with_following_value() {
        let raw = vec!["--output-webhook-url".to_string(), "https://example.com/hook".to_string()];
        let flags = parse_plugin_flags(&raw);
        assert_eq!(flags.get("--output-webhook-url").map(String::as_str), Some("https://example.com/hook"));
    }

    #[test]
    fn parse_plugin_flags_treats_bare_flag_as_true() {
        let raw = vec!["--input-chain-sync-include-cbor".to_string()];
        let flags = parse_plugin_flags(&raw);
        assert_eq!(flags.get("--input-chain-sync-include-cbor").map(String::as_str), Some("true"));
    }

    #[test]
    fn parse_plugin_flags_treats_flag_followed_by_flag_as_true() {
        let raw = vec!["--a".to_string(), "--b".to_string(), "value".to_string()];
        let flags = parse_plugin_flags(&raw);
        assert_eq!(flags.get("--a").map(String::as_str), Some("true"));
        assert_eq!(flags.get("--b").map(String::as_str), Some("value"));
    }

    #[test]
    fn parse_plugin_flags_skips_tokens_without_a_leading_flag() {
        let raw = vec!["stray".to_string(), "--a".to_string(), "1".to_string()];
        let flags = parse_plugin_flags(&raw);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags.get("--a").map(String::as_str), Some("1"));
    }

    #[test]
    fn config_string_list_accepts_a_sequence() {
        let config = Config::builder()
            .add_source(config::File::from_str("output: [webhook, log]", config::FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(config_string_list(&config, "output"), vec!["webhook".to_string(), "log".to_string()]);
    }

    #[test]
    fn config_string_list_accepts_a_scalar() {
        let config = Config::builder()
            .add_source(config::File::from_str("output: webhook", config::FileFormat::Yaml))
            .build()
            .unwrap();
        assert_eq!(config_string_list(&config, "output"), vec!["webhook".to_string()]);
    }

    #[test]
    fn config_string_list_defaults_to_empty_when_absent() {
        let config = Config::builder().build().unwrap();
        assert!(config_string_list(&config, "output").is_empty());
    }
}

//! Plugin registry and declarative option resolution.
//!
//! Each registered plugin declares its option schema once; the registry
//! walks CLI flags, environment variables, and the loaded config document
//! in that order to resolve a value, falling back to the declared default.
//! Mirrors the resolution `StakeDeltaFilterParams::conf`/`conf_enum`
//! perform against a single `config::Config`, generalized to also consult
//! CLI flags and environment first.

use relay_common::ConfigError;
use std::collections::HashMap;
use std::sync::Arc;

use crate::plugin::{Plugin, PluginKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    String,
    Bool,
    Int,
    Uint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    String(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(u) => Some(*u),
            _ => None,
        }
    }

    fn parse(raw: &str, option_type: OptionType, option_name: &str) -> Result<Self, ConfigError> {
        match option_type {
            OptionType::String => Ok(Self::String(raw.to_string())),
            OptionType::Bool => raw
                .parse::<bool>()
                .map(Self::Bool)
                .map_err(|_| invalid(option_name, raw)),
            OptionType::Int => raw
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|_| invalid(option_name, raw)),
            OptionType::Uint => raw
                .parse::<u64>()
                .map(Self::Uint)
                .map_err(|_| invalid(option_name, raw)),
        }
    }
}

fn invalid(option: &str, raw: &str) -> ConfigError {
    ConfigError::InvalidOption {
        option: option.to_string(),
        reason: format!("cannot parse '{raw}'"),
    }
}

/// One declared, resolvable option of a plugin.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub name: String,
    pub option_type: OptionType,
    pub description: String,
    pub default: OptionValue,
    /// Explicit CLI flag, e.g. `--webhook-url`. If unset, the registry
    /// generates `--<kind>-<plugin>-<name>`.
    pub cli_flag: Option<String>,
    /// Explicit environment variable name. If unset, the registry
    /// generates `<KIND>_<PLUGIN>_<NAME>`.
    pub env_var: Option<String>,
}

impl OptionSpec {
    pub fn new(name: impl Into<String>, option_type: OptionType, default: OptionValue) -> Self {
        Self {
            name: name.into(),
            option_type,
            description: String::new(),
            default,
            cli_flag: None,
            env_var: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the environment variable this option is read from. Checked
    /// ahead of the generated `<KIND>_<PLUGIN>_<OPTION>` name, not instead
    /// of it — the generated name still works as a fallback.
    pub fn with_env_var(mut self, env_var: impl Into<String>) -> Self {
        self.env_var = Some(env_var.into());
        self
    }

    fn generated_cli_flag(&self, kind: PluginKind, plugin_name: &str) -> String {
        self.cli_flag.clone().unwrap_or_else(|| {
            format!("--{}-{}-{}", kind.as_str(), plugin_name, self.name).replace('_', "-")
        })
    }

    fn generated_env_var(&self, kind: PluginKind, plugin_name: &str) -> String {
        format!("{}_{}_{}", kind.as_str(), plugin_name, self.name)
            .to_uppercase()
            .replace('-', "_")
    }

    /// Walk CLI flags, then the explicit env var override (if any), then the
    /// generated env var, then the config document, then the declared
    /// default, returning the first value found. The explicit override and
    /// the generated name are two distinct, separately-checked tiers: an
    /// explicit `env_var` never shadows the generated name out of existence.
    pub fn resolve(&self, ctx: &ResolutionContext) -> Result<OptionValue, ConfigError> {
        let cli_flag = self.generated_cli_flag(ctx.plugin_kind, ctx.plugin_name);
        if let Some(raw) = ctx.cli_flags.get(&cli_flag) {
            return OptionValue::parse(raw, self.option_type, &self.name);
        }

        if let Some(explicit) = &self.env_var {
            if let Some(raw) = ctx.env.get(explicit) {
                return OptionValue::parse(raw, self.option_type, &self.name);
            }
        }

        let generated_env_var = self.generated_env_var(ctx.plugin_kind, ctx.plugin_name);
        if let Some(raw) = ctx.env.get(&generated_env_var) {
            return OptionValue::parse(raw, self.option_type, &self.name);
        }

        let config_key = format!(
            "plugins.{}.{}.{}",
            ctx.plugin_kind.as_str(),
            ctx.plugin_name,
            self.name
        );
        if let Some(config) = ctx.config {
            let from_config = match self.option_type {
                OptionType::String => config.get_string(&config_key).ok().map(OptionValue::String),
                OptionType::Bool => config.get_bool(&config_key).ok().map(OptionValue::Bool),
                OptionType::Int => config.get_int(&config_key).ok().map(OptionValue::Int),
                OptionType::Uint => config
                    .get_int(&config_key)
                    .ok()
                    .and_then(|v| u64::try_from(v).ok())
                    .map(OptionValue::Uint),
            };
            if let Some(value) = from_config {
                return Ok(value);
            }
        }

        Ok(self.default.clone())
    }
}

/// Inputs to option resolution for one plugin instance.
pub struct ResolutionContext<'a> {
    pub plugin_kind: PluginKind,
    pub plugin_name: &'a str,
    pub cli_flags: &'a HashMap<String, String>,
    pub env: &'a HashMap<String, String>,
    pub config: Option<&'a config::Config>,
}

/// Resolved values for every option a plugin declared, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOptions {
    values: HashMap<String, OptionValue>,
}

impl ResolvedOptions {
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(OptionValue::as_str).map(str::to_string)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(OptionValue::as_bool)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(OptionValue::as_int)
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(OptionValue::as_uint)
    }
}

/// A factory that builds a running plugin instance from resolved options.
pub type PluginFactory =
    Arc<dyn Fn(ResolvedOptions) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// One entry in the registry: a plugin's identity, option schema, and the
/// factory used to instantiate it once options are resolved.
pub struct PluginEntry {
    pub kind: PluginKind,
    pub name: String,
    pub description: String,
    pub options: Vec<OptionSpec>,
    pub factory: PluginFactory,
}

impl PluginEntry {
    pub fn resolve_options(
        &self,
        cli_flags: &HashMap<String, String>,
        env: &HashMap<String, String>,
        config: Option<&config::Config>,
    ) -> Result<ResolvedOptions, ConfigError> {
        let ctx = ResolutionContext {
            plugin_kind: self.kind,
            plugin_name: &self.name,
            cli_flags,
            env,
            config,
        };
        let mut values = HashMap::new();
        for option in &self.options {
            values.insert(option.name.clone(), option.resolve(&ctx)?);
        }
        Ok(ResolvedOptions { values })
    }

    pub fn build(&self, options: ResolvedOptions) -> anyhow::Result<Box<dyn Plugin>> {
        (self.factory)(options)
    }
}

/// The set of plugins the daemon knows how to instantiate, keyed by
/// `(kind, name)`.
#[derive(Default)]
pub struct Registry {
    entries: Vec<PluginEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entry: PluginEntry) {
        self.entries.push(entry);
    }

    pub fn find(&self, kind: PluginKind, name: &str) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.kind == kind && e.name == name)
    }

    pub fn list(&self, kind: PluginKind) -> Vec<&PluginEntry> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }

    /// Resolve options and instantiate a named plugin, or
    /// `ConfigError::UnknownPlugin` if no such `(kind, name)` is registered.
    pub fn instantiate(
        &self,
        kind: PluginKind,
        name: &str,
        cli_flags: &HashMap<String, String>,
        env: &HashMap<String, String>,
        config: Option<&config::Config>,
    ) -> anyhow::Result<Box<dyn Plugin>> {
        let entry = self
            .find(kind, name)
            .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))?;
        let options = entry.resolve_options(cli_flags, env, config)?;
        entry.build(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> OptionSpec {
        OptionSpec::new("interval", OptionType::Uint, OptionValue::Uint(5))
    }

    #[test]
    fn cli_flag_beats_everything() {
        let mut cli = HashMap::new();
        cli.insert("--input-mempool-interval".to_string(), "9".to_string());
        let mut env = HashMap::new();
        env.insert("INPUT_MEMPOOL_INTERVAL".to_string(), "7".to_string());

        let ctx = ResolutionContext {
            plugin_kind: PluginKind::Input,
            plugin_name: "mempool",
            cli_flags: &cli,
            env: &env,
            config: None,
        };
        assert_eq!(spec().resolve(&ctx).unwrap(), OptionValue::Uint(9));
    }

    #[test]
    fn env_beats_default() {
        let cli = HashMap::new();
        let mut env = HashMap::new();
        env.insert("INPUT_MEMPOOL_INTERVAL".to_string(), "7".to_string());

        let ctx = ResolutionContext {
            plugin_kind: PluginKind::Input,
            plugin_name: "mempool",
            cli_flags: &cli,
            env: &env,
            config: None,
        };
        assert_eq!(spec().resolve(&ctx).unwrap(), OptionValue::Uint(7));
    }

    #[test]
    fn explicit_env_var_is_checked_ahead_of_the_generated_name() {
        let cli = HashMap::new();
        let mut env = HashMap::new();
        env.insert("MEMPOOL_POLL_SECONDS".to_string(), "9".to_string());

        let ctx = ResolutionContext {
            plugin_kind: PluginKind::Input,
            plugin_name: "mempool",
            cli_flags: &cli,
            env: &env,
            config: None,
        };
        let spec = spec().with_env_var("MEMPOOL_POLL_SECONDS");
        assert_eq!(spec.resolve(&ctx).unwrap(), OptionValue::Uint(9));
    }

    #[test]
    fn generated_env_var_still_works_as_a_fallback_when_an_explicit_override_is_set() {
        let cli = HashMap::new();
        let mut env = HashMap::new();
        env.insert("INPUT_MEMPOOL_INTERVAL".to_string(), "7".to_string());

        let ctx = ResolutionContext {
            plugin_kind: PluginKind::Input,
            plugin_name: "mempool",
            cli_flags: &cli,
            env: &env,
            config: None,
        };
        // The explicit override isn't set in the environment here, so
        // resolution must still fall through to the generated name rather
        // than stopping at the (absent) explicit one.
        let spec = spec().with_env_var("MEMPOOL_POLL_SECONDS");
        assert_eq!(spec.resolve(&ctx).unwrap(), OptionValue::Uint(7));
    }

    #[test]
    fn falls_back_to_default() {
        let cli = HashMap::new();
        let env = HashMap::new();
        let ctx = ResolutionContext {
            plugin_kind: PluginKind::Input,
            plugin_name: "mempool",
            cli_flags: &cli,
            env: &env,
            config: None,
        };
        assert_eq!(spec().resolve(&ctx).unwrap(), OptionValue::Uint(5));
    }
}

//! Declarative configuration for wiring a Mongoose server: which sources,
//! processors, and agent groups exist, and how they're connected, without
//! touching the imperative registration API directly.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod topology;

pub use topology::ServerTopologyBuilder;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("unknown agent group referenced by processor '{processor}': {group}")]
    UnknownAgentGroup { processor: String, group: String },

    #[error("source '{source}' failed during registration: {message}")]
    SourceRegistration { source: String, message: String },

    #[cfg(feature = "toml-source")]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum WrapStrategyConfig {
    SubscriptionNoWrap,
    SubscriptionNamedEvent,
    BroadcastNoWrap,
    BroadcastNamedEvent,
}

#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum SlowConsumerStrategyConfig {
    Backoff,
    Disconnect,
    ExitProcess,
}

#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdleStrategyConfig {
    BusySpin,
    Yielding,
    Sleeping { millis: u64 },
}

impl IdleStrategyConfig {
    pub fn sleep_duration(&self) -> Option<Duration> {
        match self {
            IdleStrategyConfig::Sleeping { millis } => Some(Duration::from_millis(*millis)),
            _ => None,
        }
    }
}

impl From<IdleStrategyConfig> for mongoose_core::agent::IdleStrategy {
    fn from(value: IdleStrategyConfig) -> Self {
        match value {
            IdleStrategyConfig::BusySpin => mongoose_core::agent::IdleStrategy::BusySpin,
            IdleStrategyConfig::Yielding => mongoose_core::agent::IdleStrategy::Yielding,
            IdleStrategyConfig::Sleeping { millis } => {
                mongoose_core::agent::IdleStrategy::Sleeping(Duration::from_millis(millis))
            }
        }
    }
}

impl From<WrapStrategyConfig> for mongoose_core::WrapStrategy {
    fn from(value: WrapStrategyConfig) -> Self {
        match value {
            WrapStrategyConfig::SubscriptionNoWrap => mongoose_core::WrapStrategy::SubscriptionNoWrap,
            WrapStrategyConfig::SubscriptionNamedEvent => {
                mongoose_core::WrapStrategy::SubscriptionNamedEvent
            }
            WrapStrategyConfig::BroadcastNoWrap => mongoose_core::WrapStrategy::BroadcastNoWrap,
            WrapStrategyConfig::BroadcastNamedEvent => mongoose_core::WrapStrategy::BroadcastNamedEvent,
        }
    }
}

impl From<SlowConsumerStrategyConfig> for mongoose_core::SlowConsumerStrategy {
    fn from(value: SlowConsumerStrategyConfig) -> Self {
        match value {
            SlowConsumerStrategyConfig::Backoff => mongoose_core::SlowConsumerStrategy::Backoff,
            SlowConsumerStrategyConfig::Disconnect => mongoose_core::SlowConsumerStrategy::Disconnect,
            SlowConsumerStrategyConfig::ExitProcess => mongoose_core::SlowConsumerStrategy::ExitProcess,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    1024
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SubscriptionConfig {
    pub source: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    pub wrap_strategy: WrapStrategyConfig,
    #[serde(default = "default_slow_consumer_strategy")]
    pub slow_consumer_strategy: SlowConsumerStrategyConfig,
}

fn default_slow_consumer_strategy() -> SlowConsumerStrategyConfig {
    SlowConsumerStrategyConfig::Disconnect
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ProcessorConfig {
    pub name: String,
    pub agent_group: String,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SinkConfig {
    pub name: String,
    pub subscription: SubscriptionConfig,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AgentGroupConfig {
    pub name: String,
    #[serde(default = "default_idle_strategy")]
    pub idle_strategy: IdleStrategyConfig,
}

fn default_idle_strategy() -> IdleStrategyConfig {
    IdleStrategyConfig::Yielding
}

#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct GlobalConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub agent_groups: Vec<AgentGroupConfig>,
}

impl GlobalConfig {
    /// Structural validation: unique names within each section, and every
    /// processor's `agent_group` referencing a group that actually exists.
    /// Does not touch the flow manager — that wiring happens once the
    /// config has been accepted.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(("source", source.name.as_str())) {
                return Err(ConfigError::DuplicateName(source.name.clone()));
            }
        }
        for processor in &self.processors {
            if !seen.insert(("processor", processor.name.as_str())) {
                return Err(ConfigError::DuplicateName(processor.name.clone()));
            }
        }

        let group_names: std::collections::HashSet<&str> =
            self.agent_groups.iter().map(|g| g.name.as_str()).collect();
        for processor in &self.processors {
            if !group_names.contains(processor.agent_group.as_str()) {
                return Err(ConfigError::UnknownAgentGroup {
                    processor: processor.name.clone(),
                    group: processor.agent_group.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(feature = "toml-source")]
pub fn load_from_toml_str(contents: &str) -> Result<GlobalConfig> {
    let config: GlobalConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "toml-source")]
pub fn load_from_toml_file(path: impl AsRef<std::path::Path>) -> Result<GlobalConfig> {
    let contents = std::fs::read_to_string(path)?;
    load_from_toml_str(&contents)
}

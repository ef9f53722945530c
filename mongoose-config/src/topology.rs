//! Builds runtime objects from a validated [`GlobalConfig`].
//!
//! Shaped like a dependency-injection builder: a config value plus a set of
//! optional, externally-supplied dependencies, with `build()` erroring out
//! on anything still missing rather than panicking. Here the missing pieces
//! are per-source registration closures, since a source's payload type is
//! only known at the embedder's call site, never to this crate.

use std::collections::HashMap;
use std::sync::Arc;

use mongoose_core::EventFlowManager;

use crate::{ConfigError, GlobalConfig, Result};

type SourceRegistrar = Box<dyn FnOnce(&EventFlowManager) -> mongoose_core::Result<()>>;

/// Assembles an [`EventFlowManager`] from a [`GlobalConfig`]'s declared
/// sources, deferring the actual `register_event_source::<T>` call (which
/// needs a concrete `T`) to a registrar supplied per source name.
pub struct ServerTopologyBuilder {
    config: GlobalConfig,
    registrars: Vec<(String, SourceRegistrar)>,
}

impl ServerTopologyBuilder {
    /// Validates `config` up front, same as `OrchestratorRuntimeBuilder::new`
    /// takes its config as-is and only builder-step failures surface later.
    pub fn new(config: GlobalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registrars: Vec::new(),
        })
    }

    /// Supplies the concrete-type registration closure for the source named
    /// `name`. Every source declared in the config must get exactly one of
    /// these before `build()` is called.
    pub fn with_source_registrar(
        mut self,
        name: impl Into<String>,
        register: impl FnOnce(&EventFlowManager) -> mongoose_core::Result<()> + 'static,
    ) -> Self {
        self.registrars.push((name.into(), Box::new(register)));
        self
    }

    /// Looks up the idle strategy configured for `group`, converted to the
    /// core's runtime type.
    pub fn agent_group_idle_strategy(
        &self,
        group: &str,
    ) -> Result<mongoose_core::agent::IdleStrategy> {
        self.config
            .agent_groups
            .iter()
            .find(|g| g.name == group)
            .map(|g| g.idle_strategy.into())
            .ok_or_else(|| ConfigError::MissingField(format!("unknown agent group '{group}'")))
    }

    /// Runs every supplied registrar against a fresh flow manager, in the
    /// order the config lists its sources. Errors if a declared source has
    /// no matching registrar, or if a registrar itself fails.
    pub fn build(self) -> Result<Arc<EventFlowManager>> {
        let manager = Arc::new(EventFlowManager::new());
        let mut registrars: HashMap<String, SourceRegistrar> =
            self.registrars.into_iter().collect();

        for source in &self.config.sources {
            let register = registrars.remove(&source.name).ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "no source registrar supplied for '{}'",
                    source.name
                ))
            })?;
            register(&manager).map_err(|err| ConfigError::SourceRegistration {
                source: source.name.clone(),
                message: err.to_string(),
            })?;
        }

        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentGroupConfig, IdleStrategyConfig, SourceConfig};

    fn config() -> GlobalConfig {
        GlobalConfig {
            sources: vec![SourceConfig {
                name: "orders".into(),
                queue_capacity: 8,
            }],
            agent_groups: vec![AgentGroupConfig {
                name: "workers".into(),
                idle_strategy: IdleStrategyConfig::BusySpin,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn build_fails_without_a_registrar_for_every_source() {
        let builder = ServerTopologyBuilder::new(config()).unwrap();
        assert!(matches!(
            builder.build(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn build_runs_every_supplied_registrar() {
        let builder = ServerTopologyBuilder::new(config())
            .unwrap()
            .with_source_registrar("orders", |manager| {
                manager.register_event_source::<u32>("orders").map(|_| ())
            });
        let manager = builder.build().unwrap();
        assert!(manager.get_source::<u32>(&mongoose_core::SourceName::new("orders").unwrap()).is_ok());
    }

    #[test]
    fn agent_group_idle_strategy_resolves_configured_group() {
        let builder = ServerTopologyBuilder::new(config()).unwrap();
        let strategy = builder.agent_group_idle_strategy("workers").unwrap();
        assert!(matches!(
            strategy,
            mongoose_core::agent::IdleStrategy::BusySpin
        ));
    }

    #[test]
    fn agent_group_idle_strategy_errors_on_unknown_group() {
        let builder = ServerTopologyBuilder::new(config()).unwrap();
        assert!(builder.agent_group_idle_strategy("missing").is_err());
    }
}

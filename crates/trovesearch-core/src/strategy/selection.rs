//! Which strategies exist, and which one serves a request.

use std::sync::Arc;

use crate::engine::SearchEngine;
use crate::error::StrategyError;
use crate::messages::MessageType;
use crate::store::IndexcardSource;

use super::backfill::BackfillStore;
use super::denorm::{self, TrovesearchDenorm};
use super::{parse_indexname_parts, IndexStrategy, ManagedStrategy};

type StrategyConstructor = fn() -> Arc<dyn IndexStrategy>;

fn trovesearch_denorm() -> Arc<dyn IndexStrategy> {
    Arc::new(TrovesearchDenorm::new())
}

/// Every known strategy by name; the first is the default for searching.
pub const KNOWN_STRATEGIES: &[(&str, StrategyConstructor)] =
    &[(denorm::STRATEGY_NAME, trovesearch_denorm)];

pub fn known_strategy_names() -> Vec<&'static str> {
    KNOWN_STRATEGIES.iter().map(|(name, _)| *name).collect()
}

/// The configured strategies, bound to shared services.
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<ManagedStrategy>>,
}

impl StrategyRegistry {
    /// Build the named strategies, in order; an unknown name is an error.
    pub fn from_names(
        names: &[String],
        engine: Arc<dyn SearchEngine>,
        source: Arc<dyn IndexcardSource>,
        backfills: Arc<dyn BackfillStore>,
    ) -> Result<Self, StrategyError> {
        let mut strategies = Vec::with_capacity(names.len());
        for name in names {
            let (_, construct) = KNOWN_STRATEGIES
                .iter()
                .find(|(known, _)| known == name)
                .ok_or_else(|| StrategyError::UnknownStrategy(name.clone()))?;
            strategies.push(Arc::new(ManagedStrategy::new(
                construct(),
                engine.clone(),
                source.clone(),
                backfills.clone(),
            )));
        }
        Ok(Self { strategies })
    }

    /// Every known strategy.
    pub fn all(
        engine: Arc<dyn SearchEngine>,
        source: Arc<dyn IndexcardSource>,
        backfills: Arc<dyn BackfillStore>,
    ) -> Self {
        let strategies = KNOWN_STRATEGIES
            .iter()
            .map(|(_, construct)| {
                Arc::new(ManagedStrategy::new(
                    construct(),
                    engine.clone(),
                    source.clone(),
                    backfills.clone(),
                ))
            })
            .collect();
        Self { strategies }
    }

    pub fn each_strategy(&self) -> impl Iterator<Item = &Arc<ManagedStrategy>> {
        self.strategies.iter()
    }

    pub fn get_strategy(&self, name: &str) -> Result<&Arc<ManagedStrategy>, StrategyError> {
        self.strategies
            .iter()
            .find(|s| s.strategy_name() == name)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))
    }

    pub fn default_strategy(&self) -> Result<&Arc<ManagedStrategy>, StrategyError> {
        self.strategies
            .first()
            .ok_or_else(|| StrategyError::UnknownStrategy(String::new()))
    }

    /// The strategy named by an `indexStrategy` value: either a strategy
    /// name or a specific index name (`<strategy>__<check>`).
    pub fn parse_strategy_request(
        &self,
        requested: Option<&str>,
    ) -> Result<&Arc<ManagedStrategy>, StrategyError> {
        match requested {
            None => self.default_strategy(),
            Some(requested) => {
                let name = parse_indexname_parts(requested)[0];
                self.get_strategy(name)
                    .map_err(|_| StrategyError::UnknownStrategy(requested.to_string()))
            }
        }
    }

    /// Strategies that accept messages of `message_type`.
    pub fn strategies_for_message_type(
        &self,
        message_type: MessageType,
    ) -> Vec<Arc<ManagedStrategy>> {
        self.strategies
            .iter()
            .filter(|s| s.supported_message_types().contains(&message_type))
            .cloned()
            .collect()
    }
}

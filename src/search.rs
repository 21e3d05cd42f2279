//! Cardsearch and valuesearch entry points.
//!
//! Both take a raw querystring, parse it into search params (rejecting bad
//! parameters before anything reaches the engine), and dispatch to the
//! strategy named by `indexStrategy` or the default one. Used by both the
//! `trove search` CLI commands and the `/trove/...` HTTP routes.

use anyhow::Result;
use tracing::debug;

use trovesearch_core::params::{CardsearchParams, ValuesearchParams};
use trovesearch_core::response::{CardsearchResponse, ValuesearchResponse};
use trovesearch_core::strategy::selection::StrategyRegistry;

pub async fn cardsearch(registry: &StrategyRegistry, querystring: &str) -> Result<CardsearchResponse> {
    let params = CardsearchParams::from_querystring(querystring)?;
    let managed = registry.parse_strategy_request(params.index_strategy_name.as_deref())?;
    debug!(strategy = managed.strategy_name(), querystring, "cardsearch");
    managed.pls_handle_cardsearch(&params).await
}

pub async fn valuesearch(
    registry: &StrategyRegistry,
    querystring: &str,
) -> Result<ValuesearchResponse> {
    let params = ValuesearchParams::from_querystring(querystring)?;
    let managed =
        registry.parse_strategy_request(params.cardsearch.index_strategy_name.as_deref())?;
    debug!(strategy = managed.strategy_name(), querystring, "valuesearch");
    managed.pls_handle_valuesearch(&params).await
}

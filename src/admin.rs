//! Index administration and indexcard maintenance.
//!
//! Shared by the `trove index ...` / `trove card ...` commands and the
//! `/admin/search-indexes` HTTP routes.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::info;

use trovesearch_core::error::StrategyError;
use trovesearch_core::rdf::RdfGraph;
use trovesearch_core::store::{Indexcard, IndexcardStore, SourceRecordKey};
use trovesearch_core::strategy::selection::StrategyRegistry;
use trovesearch_core::strategy::{IndexStatus, ManagedStrategy, SpecificIndex, StrategyStatus};

use crate::messenger::IndexMessenger;
use crate::progress::{BackfillProgressEvent, BackfillProgressReporter};

/// Backfill messages are published this many at a time.
pub const BACKFILL_PUBLISH_CHUNK: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexAction {
    Setup,
    Delete,
    MakeDefault,
    StartBackfill,
    MarkBackfillComplete,
    KeepLive,
    StopKeepingLive,
}

impl IndexAction {
    pub const ALL: [IndexAction; 7] = [
        IndexAction::Setup,
        IndexAction::Delete,
        IndexAction::MakeDefault,
        IndexAction::StartBackfill,
        IndexAction::MarkBackfillComplete,
        IndexAction::KeepLive,
        IndexAction::StopKeepingLive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexAction::Setup => "setup",
            IndexAction::Delete => "delete",
            IndexAction::MakeDefault => "make-default",
            IndexAction::StartBackfill => "start-backfill",
            IndexAction::MarkBackfillComplete => "mark-backfill-complete",
            IndexAction::KeepLive => "keep-live",
            IndexAction::StopKeepingLive => "stop-keeping-live",
        }
    }
}

impl fmt::Display for IndexAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match IndexAction::ALL.iter().find(|a| a.as_str() == s) {
            Some(action) => Ok(*action),
            None => bail!("unknown index action: {s}"),
        }
    }
}

pub async fn index_statuses(registry: &StrategyRegistry) -> Result<Vec<StrategyStatus>> {
    let mut statuses = Vec::new();
    for managed in registry.each_strategy() {
        statuses.push(managed.pls_get_strategy_status().await?);
    }
    Ok(statuses)
}

/// A strategy name means its current index; anything else must be a full index name.
fn resolve_index<'a>(managed: &'a ManagedStrategy, indexname: &str) -> Result<SpecificIndex<'a>> {
    if indexname == managed.strategy_name() {
        Ok(managed.current_index())
    } else {
        Ok(managed.for_specific_index(indexname)?)
    }
}

/// Apply `action` to the index named by `indexname` and report its status afterwards.
pub async fn apply_index_action(
    registry: &StrategyRegistry,
    messenger: &IndexMessenger,
    indexname: &str,
    action: IndexAction,
    progress: &dyn BackfillProgressReporter,
) -> Result<IndexStatus> {
    let managed = registry.parse_strategy_request(Some(indexname))?;
    let index = resolve_index(managed, indexname)?;
    info!(index = %index.indexname(), %action, "index action");
    match action {
        IndexAction::Setup => {
            index.pls_create().await?;
            index.pls_start_keeping_live().await?;
        }
        IndexAction::Delete => index.pls_delete().await?,
        IndexAction::MakeDefault => index.pls_make_default_for_searching().await?,
        IndexAction::StartBackfill => {
            if !index.is_current() {
                return Err(StrategyError::UnknownCheck {
                    indexname: indexname.to_string(),
                    current: managed.current_index().indexname(),
                }
                .into());
            }
            start_backfill(managed, messenger, progress).await?;
        }
        IndexAction::MarkBackfillComplete => managed.pls_mark_backfill_complete().await?,
        IndexAction::KeepLive => index.pls_start_keeping_live().await?,
        IndexAction::StopKeepingLive => index.pls_stop_keeping_live().await?,
    }
    index.pls_get_status().await
}

/// Queue every indexcard for the strategy's current index; returns how many.
pub async fn start_backfill(
    managed: &ManagedStrategy,
    messenger: &IndexMessenger,
    progress: &dyn BackfillProgressReporter,
) -> Result<usize> {
    let strategy = managed.strategy_name().to_string();
    progress.report(BackfillProgressEvent::Listing {
        strategy: strategy.clone(),
    });
    let chunk = managed.pls_start_backfill().await?;
    let total = chunk.target_ids.len() as u64;
    let mut published = 0u64;
    for part in chunk.chunked(BACKFILL_PUBLISH_CHUNK) {
        let count = part.target_ids.len() as u64;
        messenger
            .stream_message_chunks(&strategy, part.message_type, part.target_ids, BACKFILL_PUBLISH_CHUNK)
            .await?;
        published += count;
        progress.report(BackfillProgressEvent::Publishing {
            strategy: strategy.clone(),
            n: published,
            total,
        });
    }
    info!(strategy = %strategy, count = published, "backfill queued");
    Ok(published as usize)
}

/// Save a card from a tripledict JSON body and queue it for indexing.
pub async fn put_card(
    store: &dyn IndexcardStore,
    messenger: &IndexMessenger,
    source: &SourceRecordKey,
    focus_iri: &str,
    rdf_json: &str,
) -> Result<Indexcard> {
    let graph = RdfGraph::from_json(rdf_json).context("invalid rdf body")?;
    let card = store
        .save_indexcard_from_graph(source, focus_iri, &graph)
        .await?;
    messenger
        .notify_indexcard_update(std::slice::from_ref(&card.uuid))
        .await?;
    Ok(card)
}

/// Soft-delete a card and queue its removal from the indexes.
pub async fn delete_card(
    store: &dyn IndexcardStore,
    messenger: &IndexMessenger,
    uuid: &str,
) -> Result<bool> {
    let deleted = store.delete_indexcard(uuid).await?;
    if deleted {
        messenger.notify_indexcard_update(&[uuid.to_string()]).await?;
    }
    Ok(deleted)
}

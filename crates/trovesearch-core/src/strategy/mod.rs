//! Index strategies and their physical-index lifecycle.
//!
//! An [`IndexStrategy`] owns a document shape (settings and mappings), the
//! function building engine actions from indexcards, and the translation of
//! search params into engine queries. Its **strategy check** is a SHA-256
//! over the index definition, so any change to the shape names a new
//! physical index instead of migrating an old one in place.
//!
//! [`ManagedStrategy`] binds a strategy to an engine, an indexcard source,
//! and a backfill store, and runs the lifecycle through [`SpecificIndex`]:
//!
//! ```text
//! absent ──pls_create──▶ created ──pls_start_keeping_live──▶ live
//!                                                             │
//!                         pls_make_default_for_searching ─────┤
//!                                                             ▼
//!                                              default for searching
//! ```
//!
//! | Name | Example |
//! |------|---------|
//! | index | `trovesearch_denorm__<check>` |
//! | alias for keeping live | `trovesearch_denorm__live` |
//! | alias for searching | `trovesearch_denorm__search` |
//!
//! Promoting to default is one atomic alias update, so readers never see
//! zero or two indexes under the search alias.

pub mod backfill;
pub mod denorm;
pub mod selection;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::engine::{AliasAction, BulkAction, IndexDefinition, SearchEngine};
use crate::error::StrategyError;
use crate::messages::{IndexMessage, IndexMessageResponse, MessageType, MessagesChunk};
use crate::params::{CardsearchParams, ValuesearchParams};
use crate::response::{CardsearchResponse, ValuesearchResponse};
use crate::store::IndexcardSource;

use backfill::{BackfillStore, IndexBackfill};

pub const INDEXNAME_DELIM: &str = "__";

pub fn combine_indexname_parts(parts: &[&str]) -> String {
    parts.join(INDEXNAME_DELIM)
}

pub fn parse_indexname_parts(indexname: &str) -> Vec<&str> {
    indexname.split(INDEXNAME_DELIM).collect()
}

/// Hex SHA-256 of `salt` followed by the definition's JSON (keys sorted).
pub fn strategy_checksum(salt: &str, definition: &IndexDefinition) -> String {
    let json = serde_json::to_string(definition).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// A document action, not yet bound to an index.
#[derive(Debug, Clone, PartialEq)]
pub enum DocAction {
    Index { id: String, doc: Value },
    Delete { id: String },
}

impl DocAction {
    pub fn doc_id(&self) -> &str {
        match self {
            DocAction::Index { id, .. } | DocAction::Delete { id } => id,
        }
    }

    pub fn with_index(&self, index: &str) -> BulkAction {
        match self {
            DocAction::Index { id, doc } => BulkAction::Index {
                index: index.to_string(),
                id: id.clone(),
                doc: doc.clone(),
            },
            DocAction::Delete { id } => BulkAction::Delete {
                index: index.to_string(),
                id: id.clone(),
            },
        }
    }
}

/// Every action needed to bring one message's target up to date.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageActionSet {
    pub target_id: String,
    pub actions: Vec<DocAction>,
}

#[async_trait]
pub trait IndexStrategy: Send + Sync {
    fn strategy_name(&self) -> &str;

    fn index_definition(&self) -> IndexDefinition;

    fn strategy_check(&self) -> String {
        strategy_checksum(self.strategy_name(), &self.index_definition())
    }

    fn supported_message_types(&self) -> &[MessageType];

    fn backfill_message_type(&self) -> MessageType;

    /// One action set per target; total and idempotent.
    async fn build_actions(
        &self,
        source: &dyn IndexcardSource,
        chunk: &MessagesChunk,
    ) -> Result<Vec<MessageActionSet>>;

    /// Runs against the target indexes before the chunk's bulk request.
    async fn before_chunk(
        &self,
        _engine: &dyn SearchEngine,
        _chunk: &MessagesChunk,
        _indexnames: &[String],
    ) -> Result<()> {
        Ok(())
    }

    async fn handle_cardsearch(
        &self,
        engine: &dyn SearchEngine,
        indexname: &str,
        params: &CardsearchParams,
    ) -> Result<CardsearchResponse>;

    async fn handle_valuesearch(
        &self,
        engine: &dyn SearchEngine,
        indexname: &str,
        params: &ValuesearchParams,
    ) -> Result<ValuesearchResponse>;
}

/// Maps bulk results back to the messages that scheduled them.
#[derive(Debug, Default)]
pub struct ActionTracker {
    message_by_action: HashMap<(String, String), String>,
    pending_by_message: HashMap<String, HashSet<(String, String)>>,
    error_by_message: HashMap<String, (u16, String)>,
}

impl ActionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, message_id: &str, indexname: &str, doc_id: &str) {
        let key = (indexname.to_string(), doc_id.to_string());
        self.message_by_action
            .insert(key.clone(), message_id.to_string());
        self.pending_by_message
            .entry(message_id.to_string())
            .or_default()
            .insert(key);
    }

    /// Returns the message id if this was its last pending action.
    pub fn action_done(&mut self, indexname: &str, doc_id: &str) -> Option<String> {
        let key = (indexname.to_string(), doc_id.to_string());
        let message_id = self.message_by_action.get(&key)?.clone();
        let pending = self.pending_by_message.get_mut(&message_id)?;
        pending.remove(&key);
        (pending.is_empty() && !self.error_by_message.contains_key(&message_id))
            .then_some(message_id)
    }

    pub fn action_errored(&mut self, indexname: &str, doc_id: &str, status: u16, error: String) {
        let key = (indexname.to_string(), doc_id.to_string());
        if let Some(message_id) = self.message_by_action.get(&key) {
            self.error_by_message
                .entry(message_id.clone())
                .or_insert((status, error));
        }
    }

    pub fn is_done(&self, message_id: &str) -> bool {
        !self.error_by_message.contains_key(message_id)
            && self
                .pending_by_message
                .get(message_id)
                .map(HashSet::is_empty)
                .unwrap_or(true)
    }

    /// One response per target, in order.
    pub fn responses(
        &self,
        message_type: MessageType,
        target_ids: &[String],
    ) -> Vec<IndexMessageResponse> {
        target_ids
            .iter()
            .map(|target_id| {
                let message = IndexMessage::new(message_type, target_id.clone());
                if self.is_done(target_id) {
                    return IndexMessageResponse::done(message);
                }
                let (status, error) = self
                    .error_by_message
                    .get(target_id)
                    .cloned()
                    .unwrap_or((500, "no result for scheduled action".to_string()));
                IndexMessageResponse::failed(message, status, error)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub specific_indexname: String,
    pub strategy_check: String,
    pub is_current: bool,
    pub exists: bool,
    pub is_kept_live: bool,
    pub is_default_for_searching: bool,
    pub doc_count: u64,
    pub creation_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyStatus {
    pub strategy_name: String,
    pub strategy_check: String,
    pub current_index: IndexStatus,
    pub backfill: Option<IndexBackfill>,
    /// Existing indexes from earlier strategy checks.
    pub prior_indexes: Vec<IndexStatus>,
}

/// A strategy bound to the services its lifecycle needs.
pub struct ManagedStrategy {
    strategy: Arc<dyn IndexStrategy>,
    engine: Arc<dyn SearchEngine>,
    source: Arc<dyn IndexcardSource>,
    backfills: Arc<dyn BackfillStore>,
    current_check: String,
}

impl ManagedStrategy {
    pub fn new(
        strategy: Arc<dyn IndexStrategy>,
        engine: Arc<dyn SearchEngine>,
        source: Arc<dyn IndexcardSource>,
        backfills: Arc<dyn BackfillStore>,
    ) -> Self {
        let current_check = strategy.strategy_check();
        Self {
            strategy,
            engine,
            source,
            backfills,
            current_check,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.strategy_name()
    }

    pub fn current_check(&self) -> &str {
        &self.current_check
    }

    pub fn engine(&self) -> &dyn SearchEngine {
        self.engine.as_ref()
    }

    pub fn indexname_prefix(&self) -> String {
        format!("{}{INDEXNAME_DELIM}", self.strategy_name())
    }

    pub fn alias_for_keeping_live(&self) -> String {
        combine_indexname_parts(&[self.strategy_name(), "live"])
    }

    pub fn alias_for_searching(&self) -> String {
        combine_indexname_parts(&[self.strategy_name(), "search"])
    }

    pub fn current_index(&self) -> SpecificIndex<'_> {
        SpecificIndex {
            managed: self,
            strategy_check: self.current_check.clone(),
        }
    }

    /// Parse `<strategy>__<check>`; any check is accepted.
    pub fn for_specific_index(&self, indexname: &str) -> Result<SpecificIndex<'_>, StrategyError> {
        match parse_indexname_parts(indexname).as_slice() {
            [name, check] if *name == self.strategy_name() && !check.is_empty() => {
                Ok(SpecificIndex {
                    managed: self,
                    strategy_check: check.to_string(),
                })
            }
            _ => Err(StrategyError::UnknownStrategy(indexname.to_string())),
        }
    }

    pub fn assert_message_type(&self, message_type: MessageType) -> Result<(), StrategyError> {
        if self.strategy.supported_message_types().contains(&message_type) {
            Ok(())
        } else {
            Err(StrategyError::UnsupportedMessageType {
                strategy: self.strategy_name().to_string(),
                message_type: message_type.to_string(),
            })
        }
    }

    pub fn supported_message_types(&self) -> &[MessageType] {
        self.strategy.supported_message_types()
    }

    pub async fn each_existing_index(&self) -> Result<Vec<SpecificIndex<'_>>> {
        let names = self.engine.indexes_matching(&self.indexname_prefix()).await?;
        Ok(names
            .iter()
            .filter_map(|name| self.for_specific_index(name).ok())
            .collect())
    }

    /// Live indexes built by the current strategy check.
    pub async fn each_live_index(&self) -> Result<Vec<SpecificIndex<'_>>> {
        let names = self.engine.get_alias(&self.alias_for_keeping_live()).await?;
        Ok(names
            .iter()
            .filter_map(|name| self.for_specific_index(name).ok())
            .filter(SpecificIndex::is_current)
            .collect())
    }

    /// Create the current index and keep it live.
    pub async fn pls_setup(&self) -> Result<()> {
        let index = self.current_index();
        index.pls_create().await?;
        index.pls_start_keeping_live().await
    }

    /// The index under the search alias, or the current index if none is.
    pub async fn pls_get_default_for_searching(&self) -> Result<SpecificIndex<'_>> {
        let names = self.engine.get_alias(&self.alias_for_searching()).await?;
        match names.first() {
            Some(name) => Ok(self.for_specific_index(name)?),
            None => Ok(self.current_index()),
        }
    }

    /// Resolve an `indexStrategy` request: absent or the strategy name means
    /// the default for searching; a full index name must carry the current check.
    /// The resolved index must exist before any query reaches the engine.
    pub async fn get_index_for_request(&self, requested: Option<&str>) -> Result<SpecificIndex<'_>> {
        let index = match requested {
            None => self.pls_get_default_for_searching().await?,
            Some(name) if name == self.strategy_name() => {
                self.pls_get_default_for_searching().await?
            }
            Some(name) => {
                let index = self.for_specific_index(name)?;
                if !index.is_current() {
                    return Err(StrategyError::UnknownCheck {
                        indexname: name.to_string(),
                        current: self.current_index().indexname(),
                    }
                    .into());
                }
                index
            }
        };
        if !index.pls_check_exists().await? {
            return Err(StrategyError::IndexNotFound(index.indexname()).into());
        }
        Ok(index)
    }

    /// Build and submit actions for a chunk; one response per distinct target.
    ///
    /// Backfill messages write only to the current index; others write to
    /// every live index. An `Err` means nothing was confirmed.
    pub async fn pls_handle_messages_chunk(
        &self,
        chunk: &MessagesChunk,
    ) -> Result<Vec<IndexMessageResponse>> {
        self.assert_message_type(chunk.message_type)?;
        let mut seen = BTreeSet::new();
        let target_ids: Vec<String> = chunk
            .target_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        let chunk = MessagesChunk::new(chunk.message_type, target_ids);

        let indexnames: Vec<String> = if chunk.message_type.is_backfill() {
            let current = self.current_index();
            if !current.pls_check_exists().await? {
                return Err(StrategyError::IndexNotFound(current.indexname()).into());
            }
            vec![current.indexname()]
        } else {
            self.each_live_index()
                .await?
                .iter()
                .map(SpecificIndex::indexname)
                .collect()
        };
        let mut tracker = ActionTracker::new();
        if indexnames.is_empty() {
            debug!(
                strategy = self.strategy_name(),
                count = chunk.target_ids.len(),
                "no live index; nothing to do"
            );
            return Ok(tracker.responses(chunk.message_type, &chunk.target_ids));
        }

        let action_sets = self
            .strategy
            .build_actions(self.source.as_ref(), &chunk)
            .await?;
        self.strategy
            .before_chunk(self.engine.as_ref(), &chunk, &indexnames)
            .await?;

        let mut bulk = Vec::new();
        for action_set in &action_sets {
            for action in &action_set.actions {
                for indexname in &indexnames {
                    tracker.add_action(&action_set.target_id, indexname, action.doc_id());
                    bulk.push(action.with_index(indexname));
                }
            }
        }
        debug!(
            strategy = self.strategy_name(),
            messages = chunk.target_ids.len(),
            actions = bulk.len(),
            "submitting bulk actions"
        );
        if !bulk.is_empty() {
            for result in self.engine.bulk(&bulk).await? {
                if result.ok || (result.op == "delete" && result.status == 404) {
                    tracker.action_done(&result.index, &result.id);
                } else {
                    let error = result
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{} failed", result.op));
                    warn!(index = %result.index, id = %result.id, status = result.status, %error, "bulk action failed");
                    tracker.action_errored(&result.index, &result.id, result.status, error);
                }
            }
        }
        Ok(tracker.responses(chunk.message_type, &chunk.target_ids))
    }

    pub async fn pls_handle_cardsearch(&self, params: &CardsearchParams) -> Result<CardsearchResponse> {
        let index = self
            .get_index_for_request(params.index_strategy_name.as_deref())
            .await?;
        self.strategy
            .handle_cardsearch(self.engine.as_ref(), &index.indexname(), params)
            .await
    }

    pub async fn pls_handle_valuesearch(
        &self,
        params: &ValuesearchParams,
    ) -> Result<ValuesearchResponse> {
        let index = self
            .get_index_for_request(params.cardsearch.index_strategy_name.as_deref())
            .await?;
        self.strategy
            .handle_valuesearch(self.engine.as_ref(), &index.indexname(), params)
            .await
    }

    async fn load_backfill(&self) -> Result<IndexBackfill> {
        Ok(self
            .backfills
            .get_backfill(self.strategy_name())
            .await?
            .unwrap_or_else(|| {
                IndexBackfill::new(self.strategy_name(), &self.current_index().indexname())
            }))
    }

    /// Mark the current index as backfilling and return every card as one
    /// backfill chunk, for the caller to publish.
    pub async fn pls_start_backfill(&self) -> Result<MessagesChunk> {
        let current = self.current_index();
        if !current.pls_check_exists().await? {
            return Err(StrategyError::IndexNotFound(current.indexname()).into());
        }
        let mut backfill = self.load_backfill().await?;
        backfill.start(&current.indexname())?;
        let target_ids = match self.source.all_indexcard_uuids().await {
            Ok(ids) => ids,
            Err(err) => {
                backfill.mark_error(err.to_string());
                self.backfills.save_backfill(&backfill).await?;
                return Err(err);
            }
        };
        self.backfills.save_backfill(&backfill).await?;
        info!(
            index = %current.indexname(),
            count = target_ids.len(),
            "backfill started"
        );
        Ok(MessagesChunk::new(
            self.strategy.backfill_message_type(),
            target_ids,
        ))
    }

    /// Refresh the backfilled index and make it the default for searching.
    pub async fn pls_mark_backfill_complete(&self) -> Result<()> {
        let mut backfill = self.load_backfill().await?;
        backfill.mark_complete()?;
        let index = self.for_specific_index(&backfill.specific_indexname)?;
        index.pls_refresh().await?;
        index.pls_make_default_for_searching().await?;
        self.backfills.save_backfill(&backfill).await?;
        info!(index = %backfill.specific_indexname, "backfill complete");
        Ok(())
    }

    pub async fn pls_get_strategy_status(&self) -> Result<StrategyStatus> {
        let current = self.current_index();
        let mut prior_indexes = Vec::new();
        for index in self.each_existing_index().await? {
            if !index.is_current() {
                prior_indexes.push(index.pls_get_status().await?);
            }
        }
        Ok(StrategyStatus {
            strategy_name: self.strategy_name().to_string(),
            strategy_check: self.current_check.clone(),
            current_index: current.pls_get_status().await?,
            backfill: self.backfills.get_backfill(self.strategy_name()).await?,
            prior_indexes,
        })
    }
}

/// One physical index of a strategy, named by its strategy check.
#[derive(Clone)]
pub struct SpecificIndex<'a> {
    managed: &'a ManagedStrategy,
    strategy_check: String,
}

impl<'a> SpecificIndex<'a> {
    pub fn indexname(&self) -> String {
        combine_indexname_parts(&[self.managed.strategy_name(), &self.strategy_check])
    }

    pub fn strategy_check(&self) -> &str {
        &self.strategy_check
    }

    pub fn is_current(&self) -> bool {
        self.strategy_check == self.managed.current_check
    }

    pub async fn pls_check_exists(&self) -> Result<bool> {
        let exists = self.managed.engine.index_exists(&self.indexname()).await?;
        debug!(index = %self.indexname(), exists, "checked index");
        Ok(exists)
    }

    /// Fails if the index exists or is not the current version.
    pub async fn pls_create(&self) -> Result<()> {
        let indexname = self.indexname();
        if !self.is_current() {
            return Err(StrategyError::UnknownCheck {
                indexname,
                current: self.managed.current_index().indexname(),
            }
            .into());
        }
        if self.pls_check_exists().await? {
            return Err(StrategyError::IndexAlreadyExists(indexname).into());
        }
        info!(index = %indexname, "creating index");
        self.managed
            .engine
            .create_index(&indexname, &self.managed.strategy.index_definition())
            .await?;
        self.pls_refresh().await
    }

    pub async fn pls_delete(&self) -> Result<()> {
        let indexname = self.indexname();
        self.managed.engine.delete_index(&indexname).await?;
        warn!(index = %indexname, "deleted index");
        Ok(())
    }

    pub async fn pls_refresh(&self) -> Result<()> {
        self.managed.engine.refresh(&self.indexname()).await?;
        debug!(index = %self.indexname(), "refreshed");
        Ok(())
    }

    pub async fn pls_start_keeping_live(&self) -> Result<()> {
        if !self.pls_check_exists().await? {
            return Err(StrategyError::IndexNotFound(self.indexname()).into());
        }
        self.managed
            .engine
            .update_aliases(&[AliasAction::Add {
                index: self.indexname(),
                alias: self.managed.alias_for_keeping_live(),
            }])
            .await?;
        info!(index = %self.indexname(), "now kept live");
        Ok(())
    }

    pub async fn pls_stop_keeping_live(&self) -> Result<()> {
        self.managed
            .engine
            .update_aliases(&[AliasAction::Remove {
                index: self.indexname(),
                alias: self.managed.alias_for_keeping_live(),
            }])
            .await?;
        warn!(index = %self.indexname(), "no longer kept live");
        Ok(())
    }

    /// Point the search alias at this index alone, in one alias update.
    pub async fn pls_make_default_for_searching(&self) -> Result<()> {
        let indexname = self.indexname();
        if !self.pls_check_exists().await? {
            return Err(StrategyError::IndexNotFound(indexname).into());
        }
        let alias = self.managed.alias_for_searching();
        let already = self.managed.engine.get_alias(&alias).await?;
        if already == [indexname.clone()] {
            info!(%alias, index = %indexname, "alias already correct");
            return Ok(());
        }
        let mut actions: Vec<AliasAction> = already
            .iter()
            .filter(|name| **name != indexname)
            .map(|name| AliasAction::Remove {
                index: name.clone(),
                alias: alias.clone(),
            })
            .collect();
        actions.push(AliasAction::Add {
            index: indexname.clone(),
            alias: alias.clone(),
        });
        warn!(%alias, removing = ?already, adding = %indexname, "updating alias");
        self.managed.engine.update_aliases(&actions).await
    }

    pub async fn pls_get_status(&self) -> Result<IndexStatus> {
        let indexname = self.indexname();
        let info = self.managed.engine.index_info(&indexname).await?;
        let (exists, is_kept_live, is_default, doc_count, creation_date) = match info {
            None => (false, false, false, 0, None),
            Some(info) => (
                true,
                info.aliases.contains(&self.managed.alias_for_keeping_live()),
                info.aliases.contains(&self.managed.alias_for_searching()),
                info.doc_count,
                info.created,
            ),
        };
        Ok(IndexStatus {
            specific_indexname: indexname,
            strategy_check: self.strategy_check.clone(),
            is_current: self.is_current(),
            exists,
            is_kept_live,
            is_default_for_searching: is_default,
            doc_count,
            creation_date,
        })
    }
}

//! Search-engine abstraction.
//!
//! The [`SearchEngine`] trait covers the index, alias, bulk and search
//! operations index strategies need. The native crate implements it over
//! Elasticsearch 8 HTTP; [`memory::InMemoryEngine`] evaluates the
//! [`query`](crate::query) model in-process for tests and local use.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::query::{Query, SearchRequest, SearchResponse};

/// Settings and mappings for creating a physical index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexDefinition {
    pub settings: Value,
    pub mappings: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    Index {
        index: String,
        id: String,
        doc: Value,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkAction {
    pub fn index_name(&self) -> &str {
        match self {
            BulkAction::Index { index, .. } | BulkAction::Delete { index, .. } => index,
        }
    }

    pub fn doc_id(&self) -> &str {
        match self {
            BulkAction::Index { id, .. } | BulkAction::Delete { id, .. } => id,
        }
    }

    pub fn op(&self) -> &'static str {
        match self {
            BulkAction::Index { .. } => "index",
            BulkAction::Delete { .. } => "delete",
        }
    }
}

/// Outcome of one bulk action, in request order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    pub index: String,
    pub id: String,
    pub op: String,
    pub status: u16,
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub aliases: BTreeSet<String>,
    pub created: Option<DateTime<Utc>>,
    pub doc_count: u64,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Fails if an index named `name` already exists.
    async fn create_index(&self, name: &str, definition: &IndexDefinition) -> Result<()>;

    /// Deleting a missing index is not an error.
    async fn delete_index(&self, name: &str) -> Result<()>;

    async fn index_exists(&self, name: &str) -> Result<bool>;

    async fn refresh(&self, name: &str) -> Result<()>;

    /// Names of existing indexes starting with `prefix`.
    async fn indexes_matching(&self, prefix: &str) -> Result<Vec<String>>;

    /// Index names currently under `alias`.
    async fn get_alias(&self, alias: &str) -> Result<Vec<String>>;

    /// Apply all alias actions atomically.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;

    async fn index_info(&self, name: &str) -> Result<Option<IndexInfo>>;

    /// Per-action results; an `Err` means the request as a whole failed.
    async fn bulk(&self, actions: &[BulkAction]) -> Result<Vec<BulkItemResult>>;

    async fn delete_by_query(&self, indexes: &[String], query: &Query) -> Result<u64>;

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResponse>;
}

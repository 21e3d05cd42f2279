//! Storage abstraction for indexcards and resource identifiers.
//!
//! Three traits split what different callers need:
//!
//! | Trait | Used by | Purpose |
//! |-------|---------|---------|
//! | [`IdentifierRegistry`] | ingest | canonical [`ResourceIdentifier`]s by IRI |
//! | [`IndexcardSource`] | index strategies | latest RDF per card, all card ids |
//! | [`IndexcardStore`] | ingest, admin | save/delete cards, supersede records |
//!
//! Implementations must be `Send + Sync` to work with async runtimes. The
//! native crate provides a SQLite store; [`memory::InMemoryIndexcardStore`]
//! backs tests.

pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::iri::ResourceIdentifier;
use crate::rdf::RdfGraph;
use crate::sourcedoc::iri_synonyms;
use crate::vocab;

/// Identifies the upstream record an indexcard was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SourceRecordKey {
    pub source_config_label: String,
    pub source_record_identifier: String,
}

impl SourceRecordKey {
    pub fn new(label: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            source_config_label: label.into(),
            source_record_identifier: identifier.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestRdf {
    pub focus_iri: String,
    pub rdf_json: String,
    pub content_hash: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Indexcard {
    pub uuid: String,
    pub deleted: Option<DateTime<Utc>>,
    pub source_record: SourceRecordKey,
    pub focus_identifiers: Vec<ResourceIdentifier>,
    pub focustype_identifiers: Vec<ResourceIdentifier>,
    pub latest_rdf: Option<LatestRdf>,
}

impl Indexcard {
    pub fn iri(&self) -> String {
        vocab::indexcard_iri(&self.uuid)
    }
}

/// Everything a strategy needs to build documents for one card.
#[derive(Debug, Clone)]
pub struct IndexcardRdf {
    pub indexcard_uuid: String,
    pub focus_iri: String,
    pub rdf: RdfGraph,
    pub content_hash: String,
    pub source_config_label: String,
    pub source_record_identifier: String,
    /// The card's source record has been replaced by a newer one.
    pub is_superseded: bool,
}

impl IndexcardRdf {
    pub fn indexcard_iri(&self) -> String {
        vocab::indexcard_iri(&self.indexcard_uuid)
    }
}

/// `urn:checksum:sha-256::<hex>` of a serialized body.
pub fn content_hash(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    format!("urn:checksum:sha-256::{}", hex::encode(digest))
}

/// Focus-type IRIs (`rdf:type` objects of the focus).
pub fn focus_type_iris(graph: &RdfGraph, focus_iri: &str) -> BTreeSet<String> {
    graph
        .objects(focus_iri, &vocab::RDF_TYPE)
        .filter_map(|o| o.as_iri())
        .map(str::to_string)
        .collect()
}

#[async_trait]
pub trait IdentifierRegistry: Send + Sync {
    /// Look up by sufficiently-unique form, recording a newly seen scheme.
    async fn get_or_create_for_iri(&self, iri: &str) -> Result<ResourceIdentifier>;

    async fn get_for_iri(&self, iri: &str) -> Result<Option<ResourceIdentifier>>;

    async fn identifiers_for_iris(&self, iris: &[String]) -> Result<Vec<ResourceIdentifier>> {
        let mut identifiers = Vec::with_capacity(iris.len());
        for iri in iris {
            identifiers.push(self.get_or_create_for_iri(iri).await?);
        }
        Ok(identifiers)
    }

    /// The focus and every worthwhile `owl:sameAs` IRI, as identifiers.
    async fn save_equivalent_identifier_set(
        &self,
        graph: &RdfGraph,
        focus_iri: &str,
    ) -> Result<Vec<ResourceIdentifier>> {
        let iris: Vec<String> = iri_synonyms(graph, focus_iri).into_iter().collect();
        let mut identifiers = self.identifiers_for_iris(&iris).await?;
        let mut seen = BTreeSet::new();
        identifiers.retain(|ri| seen.insert(ri.sufficiently_unique_iri.clone()));
        Ok(identifiers)
    }
}

#[async_trait]
pub trait IndexcardSource: Send + Sync {
    /// Latest RDF for each given card; deleted or body-less cards are omitted.
    async fn latest_rdf_for_indexcards(&self, uuids: &[String]) -> Result<Vec<IndexcardRdf>>;

    /// Every non-deleted card, for backfill.
    async fn all_indexcard_uuids(&self) -> Result<Vec<String>>;
}

#[async_trait]
pub trait IndexcardStore: IdentifierRegistry + IndexcardSource {
    /// Create or update the card for `source`'s description of `focus_iri`.
    ///
    /// Fails with [`RdfError::IriMismatch`](crate::error::RdfError) if the
    /// graph says nothing about the focus.
    async fn save_indexcard_from_graph(
        &self,
        source: &SourceRecordKey,
        focus_iri: &str,
        graph: &RdfGraph,
    ) -> Result<Indexcard>;

    /// Soft-delete; returns `false` if the card was unknown or already deleted.
    async fn delete_indexcard(&self, uuid: &str) -> Result<bool>;

    async fn get_indexcard(&self, uuid: &str) -> Result<Option<Indexcard>>;

    /// Mark `old`'s cards as superseded by `new`; returns the affected card uuids.
    async fn mark_source_record_replaced(
        &self,
        old: &SourceRecordKey,
        new: &SourceRecordKey,
    ) -> Result<Vec<String>>;
}

//! In-memory [`IndexcardStore`] implementation for testing.
//!
//! All state sits behind one `std::sync::RwLock`; no guard is held across
//! an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;

use crate::error::RdfError;
use crate::iri::{sufficiently_unique_iri, ResourceIdentifier};
use crate::rdf::RdfGraph;

use super::{
    content_hash, focus_type_iris, IdentifierRegistry, Indexcard, IndexcardRdf, IndexcardSource,
    IndexcardStore, LatestRdf, SourceRecordKey,
};

#[derive(Default)]
struct State {
    identifiers: HashMap<String, ResourceIdentifier>,
    next_identifier_id: i64,
    replaced_by: HashMap<SourceRecordKey, SourceRecordKey>,
    cards: BTreeMap<String, Indexcard>,
    archive: HashMap<(String, String), String>,
}

/// In-memory indexcard store and identifier registry.
pub struct InMemoryIndexcardStore {
    state: RwLock<State>,
}

impl InMemoryIndexcardStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryIndexcardStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentifierRegistry for InMemoryIndexcardStore {
    async fn get_or_create_for_iri(&self, iri: &str) -> Result<ResourceIdentifier> {
        let suffuniq = sufficiently_unique_iri(iri)?;
        let mut state = self.write();
        if let Some(existing) = state.identifiers.get_mut(&suffuniq) {
            existing.observe(iri)?;
            return Ok(existing.clone());
        }
        state.next_identifier_id += 1;
        let mut identifier = ResourceIdentifier::first_seen(iri)?;
        identifier.id = state.next_identifier_id;
        state.identifiers.insert(suffuniq, identifier.clone());
        Ok(identifier)
    }

    async fn get_for_iri(&self, iri: &str) -> Result<Option<ResourceIdentifier>> {
        let suffuniq = sufficiently_unique_iri(iri)?;
        Ok(self.read().identifiers.get(&suffuniq).cloned())
    }
}

#[async_trait]
impl IndexcardSource for InMemoryIndexcardStore {
    async fn latest_rdf_for_indexcards(&self, uuids: &[String]) -> Result<Vec<IndexcardRdf>> {
        let state = self.read();
        let mut found = Vec::new();
        for uuid in uuids {
            let Some(card) = state.cards.get(uuid) else {
                continue;
            };
            let Some(latest) = card.latest_rdf.as_ref().filter(|_| card.deleted.is_none()) else {
                continue;
            };
            found.push(IndexcardRdf {
                indexcard_uuid: card.uuid.clone(),
                focus_iri: latest.focus_iri.clone(),
                rdf: RdfGraph::from_json(&latest.rdf_json)?,
                content_hash: latest.content_hash.clone(),
                source_config_label: card.source_record.source_config_label.clone(),
                source_record_identifier: card.source_record.source_record_identifier.clone(),
                is_superseded: state.replaced_by.contains_key(&card.source_record),
            });
        }
        Ok(found)
    }

    async fn all_indexcard_uuids(&self) -> Result<Vec<String>> {
        Ok(self
            .read()
            .cards
            .values()
            .filter(|c| c.deleted.is_none())
            .map(|c| c.uuid.clone())
            .collect())
    }
}

#[async_trait]
impl IndexcardStore for InMemoryIndexcardStore {
    async fn save_indexcard_from_graph(
        &self,
        source: &SourceRecordKey,
        focus_iri: &str,
        graph: &RdfGraph,
    ) -> Result<Indexcard> {
        if !graph.has_subject(focus_iri) {
            return Err(RdfError::IriMismatch(focus_iri.to_string()).into());
        }
        let focus_identifiers = self.save_equivalent_identifier_set(graph, focus_iri).await?;
        let type_iris: Vec<String> = focus_type_iris(graph, focus_iri).into_iter().collect();
        let focustype_identifiers = self.identifiers_for_iris(&type_iris).await?;
        let rdf_json = graph.to_canonical_json();
        let hash = content_hash(&rdf_json);

        let mut guard = self.write();
        let state = &mut *guard;
        let existing_uuid = state
            .cards
            .values()
            .find(|c| {
                &c.source_record == source
                    && c.focus_identifiers.iter().any(|ri| {
                        focus_identifiers
                            .iter()
                            .any(|f| f.sufficiently_unique_iri == ri.sufficiently_unique_iri)
                    })
            })
            .map(|c| c.uuid.clone());
        let uuid = existing_uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let archive_key = (uuid.clone(), hash.clone());
        match state.archive.get(&archive_key) {
            Some(archived) if archived != &rdf_json => {
                bail!("content hash collision for indexcard {uuid}: {hash}")
            }
            Some(_) => {}
            None => {
                state.archive.insert(archive_key, rdf_json.clone());
            }
        }

        let card = state.cards.entry(uuid.clone()).or_insert_with(|| Indexcard {
            uuid: uuid.clone(),
            deleted: None,
            source_record: source.clone(),
            focus_identifiers: Vec::new(),
            focustype_identifiers: Vec::new(),
            latest_rdf: None,
        });
        card.focus_identifiers = focus_identifiers;
        card.focustype_identifiers = focustype_identifiers;
        if card.deleted.is_none() {
            card.latest_rdf = Some(LatestRdf {
                focus_iri: focus_iri.to_string(),
                rdf_json,
                content_hash: hash,
                modified: Utc::now(),
            });
        }
        Ok(card.clone())
    }

    async fn delete_indexcard(&self, uuid: &str) -> Result<bool> {
        let mut state = self.write();
        match state.cards.get_mut(uuid) {
            Some(card) if card.deleted.is_none() => {
                card.deleted = Some(Utc::now());
                card.latest_rdf = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_indexcard(&self, uuid: &str) -> Result<Option<Indexcard>> {
        Ok(self.read().cards.get(uuid).cloned())
    }

    async fn mark_source_record_replaced(
        &self,
        old: &SourceRecordKey,
        new: &SourceRecordKey,
    ) -> Result<Vec<String>> {
        let mut state = self.write();
        state.replaced_by.insert(old.clone(), new.clone());
        Ok(state
            .cards
            .values()
            .filter(|c| &c.source_record == old)
            .map(|c| c.uuid.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::RdfObject;
    use crate::vocab::{dcterms, osfmap, owl, rdf};

    fn graph(title: &str) -> RdfGraph {
        let mut g = RdfGraph::new();
        g.add("https://x/item", &dcterms("title"), RdfObject::literal(title));
        g.add("https://x/item", &rdf("type"), RdfObject::iri(osfmap("Preprint")));
        g.add("https://x/item", &owl("sameAs"), RdfObject::iri("http://doi.org/10.1/x"));
        g
    }

    #[tokio::test]
    async fn test_identifier_scheme_variants_share_identity() {
        let store = InMemoryIndexcardStore::new();
        let a = store.get_or_create_for_iri("http://x.y/z").await.unwrap();
        let b = store.get_or_create_for_iri("https://x.y/z/").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.scheme_list, vec!["http", "https"]);
        let found = store.get_for_iri("HTTPS://x.y/z").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
        assert!(["http://x.y/z", "https://x.y/z"].contains(&found.as_iri().as_str()));
        assert!(store.get_for_iri("https://never/seen").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_reuses_card_and_replaces_body() {
        let store = InMemoryIndexcardStore::new();
        let src = SourceRecordKey::new("test", "rec-1");
        let first = store
            .save_indexcard_from_graph(&src, "https://x/item", &graph("one"))
            .await
            .unwrap();
        let second = store
            .save_indexcard_from_graph(&src, "https://x/item", &graph("two"))
            .await
            .unwrap();
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(second.focus_identifiers.len(), 2);
        assert_eq!(second.focustype_identifiers.len(), 1);
        let latest = store
            .latest_rdf_for_indexcards(&[first.uuid.clone()])
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(
            latest[0].rdf.q("https://x/item", &[dcterms("title").as_str()]),
            vec![RdfObject::literal("two")]
        );
    }

    #[tokio::test]
    async fn test_save_requires_focus_in_graph() {
        let store = InMemoryIndexcardStore::new();
        let err = store
            .save_indexcard_from_graph(&SourceRecordKey::new("t", "r"), "https://x/other", &graph("t"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<RdfError>().is_some());
    }

    #[tokio::test]
    async fn test_delete_hides_card() {
        let store = InMemoryIndexcardStore::new();
        let card = store
            .save_indexcard_from_graph(&SourceRecordKey::new("t", "r"), "https://x/item", &graph("t"))
            .await
            .unwrap();
        assert!(store.delete_indexcard(&card.uuid).await.unwrap());
        assert!(!store.delete_indexcard(&card.uuid).await.unwrap());
        assert!(store
            .latest_rdf_for_indexcards(&[card.uuid.clone()])
            .await
            .unwrap()
            .is_empty());
        assert!(store.all_indexcard_uuids().await.unwrap().is_empty());
        assert!(store.get_indexcard(&card.uuid).await.unwrap().unwrap().deleted.is_some());
    }

    #[tokio::test]
    async fn test_superseded_flag() {
        let store = InMemoryIndexcardStore::new();
        let old = SourceRecordKey::new("t", "old");
        let card = store
            .save_indexcard_from_graph(&old, "https://x/item", &graph("t"))
            .await
            .unwrap();
        let affected = store
            .mark_source_record_replaced(&old, &SourceRecordKey::new("t", "new"))
            .await
            .unwrap();
        assert_eq!(affected, vec![card.uuid.clone()]);
        let latest = store.latest_rdf_for_indexcards(&affected).await.unwrap();
        assert!(latest[0].is_superseded);
    }
}

//! The SQLite indexcard store against a real database file, alone and
//! driving the denormalized strategy with the in-memory engine.

use std::sync::Arc;

use tempfile::TempDir;

use trovesearch::db;
use trovesearch::migrate;
use trovesearch::search;
use trovesearch::sqlite_store::SqliteIndexcardStore;
use trovesearch_core::engine::memory::InMemoryEngine;
use trovesearch_core::error::RdfError;
use trovesearch_core::messages::{MessageType, MessagesChunk};
use trovesearch_core::rdf::{RdfGraph, RdfObject};
use trovesearch_core::store::{IdentifierRegistry, IndexcardSource, IndexcardStore, SourceRecordKey};
use trovesearch_core::strategy::backfill::{BackfillStatus, BackfillStore, IndexBackfill};
use trovesearch_core::strategy::selection::StrategyRegistry;
use trovesearch_core::vocab::{dcterms, osfmap, owl, rdf};

async fn open_store() -> (TempDir, Arc<SqliteIndexcardStore>) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/trove.sqlite"))
        .await
        .unwrap();
    migrate::migrate(&pool).await.unwrap();
    (tmp, Arc::new(SqliteIndexcardStore::new(pool)))
}

fn graph(title: &str) -> RdfGraph {
    let mut g = RdfGraph::new();
    g.add("https://x/item", &dcterms("title"), RdfObject::literal(title));
    g.add("https://x/item", &rdf("type"), RdfObject::iri(osfmap("Preprint")));
    g.add("https://x/item", &owl("sameAs"), RdfObject::iri("http://doi.org/10.1/x"));
    g
}

#[tokio::test]
async fn test_identifier_scheme_variants_share_identity() {
    let (_tmp, store) = open_store().await;
    let a = store.get_or_create_for_iri("http://x.y/z").await.unwrap();
    let b = store.get_or_create_for_iri("https://x.y/z/").await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(b.scheme_list, vec!["http", "https"]);
    assert_eq!(b.raw_iri_list.len(), 2);

    let found = store.get_for_iri("HTTPS://x.y/z").await.unwrap().unwrap();
    assert_eq!(found.id, a.id);
    assert_eq!(found.scheme_list, vec!["http", "https"]);
    assert!(store.get_for_iri("https://never/seen").await.unwrap().is_none());
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let (_tmp, store) = open_store().await;
    migrate::migrate(store.pool()).await.unwrap();
    store.get_or_create_for_iri("https://x/y").await.unwrap();
}

#[tokio::test]
async fn test_save_reuses_card_and_replaces_body() {
    let (_tmp, store) = open_store().await;
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
    assert_ne!(
        first.latest_rdf.as_ref().unwrap().content_hash,
        second.latest_rdf.as_ref().unwrap().content_hash
    );

    let latest = store
        .latest_rdf_for_indexcards(&[first.uuid.clone()])
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].source_record_identifier, "rec-1");
    assert!(!latest[0].is_superseded);
    assert_eq!(
        latest[0].rdf.q("https://x/item", &[dcterms("title").as_str()]),
        vec![RdfObject::literal("two")]
    );

    let other = store
        .save_indexcard_from_graph(&SourceRecordKey::new("test", "rec-2"), "https://x/item", &graph("one"))
        .await
        .unwrap();
    assert_ne!(other.uuid, first.uuid);
    assert_eq!(store.all_indexcard_uuids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_save_requires_focus_in_graph() {
    let (_tmp, store) = open_store().await;
    let err = store
        .save_indexcard_from_graph(&SourceRecordKey::new("t", "r"), "https://x/other", &graph("t"))
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<RdfError>().is_some());
}

#[tokio::test]
async fn test_delete_and_supersede() {
    let (_tmp, store) = open_store().await;
    let old = SourceRecordKey::new("t", "old");
    let kept = store
        .save_indexcard_from_graph(&old, "https://x/item", &graph("t"))
        .await
        .unwrap();
    let doomed = store
        .save_indexcard_from_graph(&SourceRecordKey::new("t", "gone"), "https://x/item", &graph("t"))
        .await
        .unwrap();

    assert!(store.delete_indexcard(&doomed.uuid).await.unwrap());
    assert!(!store.delete_indexcard(&doomed.uuid).await.unwrap());
    assert!(!store.delete_indexcard("no-such-card").await.unwrap());
    let shown = store.get_indexcard(&doomed.uuid).await.unwrap().unwrap();
    assert!(shown.deleted.is_some());
    assert!(shown.latest_rdf.is_none());

    let affected = store
        .mark_source_record_replaced(&old, &SourceRecordKey::new("t", "new"))
        .await
        .unwrap();
    assert_eq!(affected, vec![kept.uuid.clone()]);

    let latest = store
        .latest_rdf_for_indexcards(&[kept.uuid.clone(), doomed.uuid.clone()])
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert!(latest[0].is_superseded);
    assert_eq!(store.all_indexcard_uuids().await.unwrap(), vec![kept.uuid]);
}

#[tokio::test]
async fn test_backfill_record_persists() {
    let (_tmp, store) = open_store().await;
    assert!(store.get_backfill("trovesearch_denorm").await.unwrap().is_none());

    let mut backfill = IndexBackfill::new("trovesearch_denorm", "trovesearch_denorm__a");
    backfill.start("trovesearch_denorm__a").unwrap();
    store.save_backfill(&backfill).await.unwrap();
    let loaded = store.get_backfill("trovesearch_denorm").await.unwrap().unwrap();
    assert_eq!(loaded.status, BackfillStatus::Indexing);

    backfill.mark_error("engine went away");
    store.save_backfill(&backfill).await.unwrap();
    let loaded = store.get_backfill("trovesearch_denorm").await.unwrap().unwrap();
    assert_eq!(loaded.status, BackfillStatus::Error);
    assert_eq!(loaded.error_message.as_deref(), Some("engine went away"));
}

#[tokio::test]
async fn test_sqlite_cards_are_searchable() {
    let (_tmp, store) = open_store().await;
    let engine = Arc::new(InMemoryEngine::new());
    let registry = StrategyRegistry::all(engine, store.clone(), store.clone());
    let managed = registry.default_strategy().unwrap();
    managed.pls_setup().await.unwrap();

    let card = store
        .save_indexcard_from_graph(&SourceRecordKey::new("t", "r"), "https://x/item", &graph("Glacier melt"))
        .await
        .unwrap();
    let responses = managed
        .pls_handle_messages_chunk(&MessagesChunk::new(
            MessageType::UpdateIndexcard,
            vec![card.uuid.clone()],
        ))
        .await
        .unwrap();
    assert!(responses.iter().all(|r| r.is_done));

    let found = search::cardsearch(&registry, "cardSearchText=glacier").await.unwrap();
    assert_eq!(found.card_uuids(), vec![card.uuid.as_str()]);

    let by_sameas = search::cardsearch(
        &registry,
        "cardSearchFilter[sameAs]=https://doi.org/10.1/x",
    )
    .await
    .unwrap();
    assert_eq!(by_sameas.card_uuids(), vec![card.uuid.as_str()]);
}

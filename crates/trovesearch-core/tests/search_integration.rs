//! End-to-end: indexcards through the denormalized strategy into the
//! in-memory engine, then cardsearch and valuesearch against the result.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::json;
use trovesearch_core::cursor::VALUESEARCH_MAX;
use trovesearch_core::engine::memory::InMemoryEngine;
use trovesearch_core::engine::{IndexDefinition, SearchEngine};
use trovesearch_core::error::{ParamError, StrategyError};
use trovesearch_core::messages::{MessageType, MessagesChunk};
use trovesearch_core::params::{CardsearchParams, ValuesearchParams};
use trovesearch_core::propertypath::Propertypath;
use trovesearch_core::rdf::{RdfGraph, RdfObject};
use trovesearch_core::response::TotalCount;
use trovesearch_core::store::memory::InMemoryIndexcardStore;
use trovesearch_core::store::{IndexcardStore, SourceRecordKey};
use trovesearch_core::strategy::backfill::{BackfillStatus, InMemoryBackfillStore};
use trovesearch_core::strategy::denorm::TrovesearchDenorm;
use trovesearch_core::strategy::ManagedStrategy;
use trovesearch_core::vocab::{dcterms, foaf, osfmap, rdf};

struct Harness {
    engine: Arc<InMemoryEngine>,
    store: Arc<InMemoryIndexcardStore>,
    managed: ManagedStrategy,
}

fn harness() -> Harness {
    let engine = Arc::new(InMemoryEngine::new());
    let store = Arc::new(InMemoryIndexcardStore::new());
    let managed = ManagedStrategy::new(
        Arc::new(TrovesearchDenorm::new()),
        engine.clone(),
        store.clone(),
        Arc::new(InMemoryBackfillStore::new()),
    );
    Harness {
        engine,
        store,
        managed,
    }
}

fn preprint(focus: &str, title: &str, created: &str, creator: &str, creator_name: &str) -> RdfGraph {
    let mut g = RdfGraph::new();
    g.add(focus, &rdf("type"), RdfObject::iri(osfmap("Preprint")));
    g.add(focus, &dcterms("title"), RdfObject::literal(title));
    g.add(focus, &dcterms("created"), RdfObject::literal(created));
    g.add(focus, &dcterms("creator"), RdfObject::iri(creator));
    g.add(creator, &rdf("type"), RdfObject::iri(foaf("Person")));
    g.add(creator, &foaf("name"), RdfObject::literal(creator_name));
    g
}

impl Harness {
    async fn save(&self, record: &str, graph: RdfGraph, focus: &str) -> String {
        self.store
            .save_indexcard_from_graph(&SourceRecordKey::new("test", record), focus, &graph)
            .await
            .unwrap()
            .uuid
    }

    async fn index(&self, uuids: &[String]) {
        let chunk = MessagesChunk::new(MessageType::UpdateIndexcard, uuids.to_vec());
        let responses = self.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
        assert!(responses.iter().all(|r| r.is_done), "{responses:?}");
    }

    async fn cardsearch(&self, querystring: &str) -> trovesearch_core::response::CardsearchResponse {
        let params = CardsearchParams::from_querystring(querystring).unwrap();
        self.managed.pls_handle_cardsearch(&params).await.unwrap()
    }

    async fn valuesearch(&self, querystring: &str) -> trovesearch_core::response::ValuesearchResponse {
        let params = ValuesearchParams::from_querystring(querystring).unwrap();
        self.managed.pls_handle_valuesearch(&params).await.unwrap()
    }
}

async fn two_card_corpus() -> (Harness, String, String) {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let a = h
        .save(
            "a",
            preprint("https://x/a", "Climate change effects", "2020-03-04", "https://x/alice", "Alice"),
            "https://x/a",
        )
        .await;
    let b = h
        .save(
            "b",
            preprint("https://x/b", "Ocean currents", "2021-07-01", "https://x/bob", "Bob"),
            "https://x/b",
        )
        .await;
    h.index(&[a.clone(), b.clone()]).await;
    (h, a, b)
}

#[tokio::test]
async fn test_date_filter_and_date_valuesearch() {
    let (h, a, _) = two_card_corpus().await;

    let hit = h.cardsearch("cardSearchFilter[dateCreated]=2020").await;
    assert_eq!(hit.card_uuids(), vec![a.as_str()]);
    assert_eq!(hit.total_result_count, TotalCount::Exact(1));

    let miss = h.cardsearch("cardSearchFilter[dateCreated]=2019").await;
    assert!(miss.search_result_page.is_empty());
    assert_eq!(miss.total_result_count, TotalCount::Exact(0));

    let years = h
        .valuesearch("valueSearchPropertyPath=dateCreated&cardSearchFilter[dateCreated]=2020")
        .await;
    assert_eq!(years.search_result_page.len(), 1);
    assert_eq!(years.search_result_page[0].value_value.as_deref(), Some("2020"));
    assert_eq!(years.search_result_page[0].match_count, 1);

    let all_years = h.valuesearch("valueSearchPropertyPath=dateCreated").await;
    let labels: Vec<&str> = all_years
        .search_result_page
        .iter()
        .map(|r| r.value_value.as_deref().unwrap_or_default())
        .collect();
    assert_eq!(labels, vec!["2021", "2020"]);
}

#[tokio::test]
async fn test_text_search_with_evidence() {
    let (h, a, _) = two_card_corpus().await;
    let response = h.cardsearch("cardSearchText=climate").await;
    assert_eq!(response.card_uuids(), vec![a.as_str()]);
    let evidence = &response.search_result_page[0].text_match_evidence;
    assert!(!evidence.is_empty());
    assert_eq!(evidence[0].property_path, Propertypath::new([dcterms("title")]));
    assert!(evidence[0].matching_highlight.contains("<em>Climate</em>"));

    let negated = h.cardsearch("cardSearchText=-climate").await;
    assert_eq!(negated.search_result_page.len(), 1);
    assert_ne!(negated.card_uuids(), vec![a.as_str()]);
}

#[tokio::test]
async fn test_iri_valuesearch_scoped_by_cardsearch() {
    let (h, _, _) = two_card_corpus().await;
    let creators = h.valuesearch("valueSearchPropertyPath=creator").await;
    let iris: BTreeSet<String> = creators
        .search_result_page
        .iter()
        .filter_map(|r| r.value_iri.clone())
        .collect();
    assert_eq!(
        iris,
        BTreeSet::from(["https://x/alice".to_string(), "https://x/bob".to_string()])
    );

    let scoped = h
        .valuesearch("valueSearchPropertyPath=creator&cardSearchText=ocean")
        .await;
    assert_eq!(scoped.search_result_page.len(), 1);
    let bob = &scoped.search_result_page[0];
    assert_eq!(bob.value_iri.as_deref(), Some("https://x/bob"));
    assert_eq!(bob.name_text, vec!["Bob"]);
    assert_eq!(bob.value_type, vec![foaf("Person")]);
    assert_eq!(bob.match_count, 1);
}

#[tokio::test]
async fn test_deleted_card_leaves_index() {
    let (h, a, b) = two_card_corpus().await;
    assert!(h.store.delete_indexcard(&a).await.unwrap());
    h.index(&[a.clone()]).await;
    let index = h.managed.current_index().indexname();
    assert!(h.engine.get_doc(&index, &a).is_none());
    assert!(h.engine.get_doc(&index, &b).is_some());
    let creators = h.valuesearch("valueSearchPropertyPath=creator").await;
    assert_eq!(creators.search_result_page.len(), 1);
}

#[tokio::test]
async fn test_reindex_replaces_stale_iri_values() {
    let (h, a, _) = two_card_corpus().await;
    h.save(
        "a",
        preprint("https://x/a", "Climate change effects", "2020-03-04", "https://x/carol", "Carol"),
        "https://x/a",
    )
    .await;
    h.index(&[a]).await;
    let creators = h.valuesearch("valueSearchPropertyPath=creator").await;
    let iris: BTreeSet<String> = creators
        .search_result_page
        .iter()
        .filter_map(|r| r.value_iri.clone())
        .collect();
    assert!(!iris.contains("https://x/alice"));
    assert!(iris.contains("https://x/carol"));
}

#[tokio::test]
async fn test_rejected_action_fails_only_its_message() {
    let (h, a, b) = two_card_corpus().await;
    h.engine.reject_doc_id(&a);
    let chunk = MessagesChunk::new(MessageType::UpdateIndexcard, vec![a.clone(), b.clone()]);
    let responses = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
    let failed = responses.iter().find(|r| r.index_message.target_id == a).unwrap();
    assert!(!failed.is_done);
    assert_eq!(failed.status_code, 400);
    assert!(responses
        .iter()
        .any(|r| r.index_message.target_id == b && r.is_done));
}

#[tokio::test]
async fn test_no_live_index_acknowledges_without_indexing() {
    let h = harness();
    let uuid = h
        .save(
            "a",
            preprint("https://x/a", "Title", "2020-01-01", "https://x/alice", "Alice"),
            "https://x/a",
        )
        .await;
    let chunk = MessagesChunk::new(MessageType::UpdateIndexcard, vec![uuid]);
    let responses = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
    assert!(responses.iter().all(|r| r.is_done));
    assert_eq!(h.engine.total_doc_count(), 0);
}

#[tokio::test]
async fn test_unsupported_message_type_rejected() {
    let (h, _, _) = two_card_corpus().await;
    let chunk = MessagesChunk::new(MessageType::IdentifierUsed, vec!["x".into()]);
    let err = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StrategyError>(),
        Some(StrategyError::UnsupportedMessageType { .. })
    ));
}

#[tokio::test]
async fn test_unknown_check_rejected_before_engine() {
    let (h, _, _) = two_card_corpus().await;
    h.engine.set_unavailable(true);
    let params = CardsearchParams::from_querystring("indexStrategy=trovesearch_denorm__bogus").unwrap();
    let err = h.managed.pls_handle_cardsearch(&params).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StrategyError>(),
        Some(StrategyError::UnknownCheck { .. })
    ));
}

#[tokio::test]
async fn test_lifecycle_and_backfill() {
    let h = harness();
    let current = h.managed.current_index();
    assert!(!current.pls_check_exists().await.unwrap());
    // keeping live requires the index
    assert!(current.pls_start_keeping_live().await.is_err());

    current.pls_create().await.unwrap();
    let again = current.pls_create().await.unwrap_err();
    assert!(matches!(
        again.downcast_ref::<StrategyError>(),
        Some(StrategyError::IndexAlreadyExists(_))
    ));
    let stale = h.managed.for_specific_index("trovesearch_denorm__old").unwrap();
    assert!(stale.pls_create().await.is_err());

    let uuid = h
        .save(
            "a",
            preprint("https://x/a", "Title", "2020-01-01", "https://x/alice", "Alice"),
            "https://x/a",
        )
        .await;
    let chunk = h.managed.pls_start_backfill().await.unwrap();
    assert_eq!(chunk.message_type, MessageType::BackfillIndexcard);
    assert_eq!(chunk.target_ids, vec![uuid.clone()]);
    let responses = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
    assert!(responses.iter().all(|r| r.is_done));
    h.managed.pls_mark_backfill_complete().await.unwrap();

    let status = h.managed.pls_get_strategy_status().await.unwrap();
    assert!(status.current_index.exists);
    assert!(status.current_index.is_default_for_searching);
    assert!(!status.current_index.is_kept_live);
    // card doc plus iri-value docs
    assert!(status.current_index.doc_count >= 3);
    assert_eq!(status.backfill.map(|b| b.status), Some(BackfillStatus::Complete));
    assert!(status.prior_indexes.is_empty());

    current.pls_start_keeping_live().await.unwrap();
    let status = current.pls_get_status().await.unwrap();
    assert!(status.is_kept_live);
    current.pls_stop_keeping_live().await.unwrap();
    current.pls_delete().await.unwrap();
    // idempotent
    current.pls_delete().await.unwrap();
    assert!(!current.pls_check_exists().await.unwrap());
}

#[tokio::test]
async fn test_make_default_is_exclusive() {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let old_name = "trovesearch_denorm__old";
    let definition = IndexDefinition {
        settings: json!({}),
        mappings: json!({}),
    };
    h.engine.create_index(old_name, &definition).await.unwrap();
    let old = h.managed.for_specific_index(old_name).unwrap();
    old.pls_make_default_for_searching().await.unwrap();
    assert_eq!(
        h.managed.pls_get_default_for_searching().await.unwrap().indexname(),
        old_name
    );
    h.managed
        .current_index()
        .pls_make_default_for_searching()
        .await
        .unwrap();
    let searching = h
        .engine
        .get_alias(&h.managed.alias_for_searching())
        .await
        .unwrap();
    assert_eq!(searching, vec![h.managed.current_index().indexname()]);
    let status = h.managed.pls_get_strategy_status().await.unwrap();
    assert_eq!(status.prior_indexes.len(), 1);
    assert!(!status.prior_indexes[0].is_default_for_searching);
}

#[tokio::test]
async fn test_random_pages_cover_every_card_once() {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let mut uuids = Vec::new();
    for i in 0..5 {
        let focus = format!("https://x/item{i}");
        uuids.push(
            h.save(
                &format!("rec{i}"),
                preprint(&focus, &format!("Item {i}"), "2022-01-01", "https://x/alice", "Alice"),
                &focus,
            )
            .await,
        );
    }
    h.index(&uuids).await;

    let base = "cardSearchFilter[creator]=https://x/alice&page[size]=2";
    let first = h.cardsearch(base).await;
    assert_eq!(first.total_result_count, TotalCount::Exact(5));
    assert_eq!(first.search_result_page.len(), 2);

    let mut seen: Vec<String> = first.card_uuids().iter().map(|s| s.to_string()).collect();
    let mut next = first.next_page_cursor.clone();
    let mut last_page = first.clone();
    while let Some(cursor) = next {
        let page = h
            .cardsearch(&format!("{base}&page[cursor]={cursor}"))
            .await;
        assert_eq!(page.total_result_count, TotalCount::Exact(5));
        seen.extend(page.card_uuids().iter().map(|s| s.to_string()));
        next = page.next_page_cursor.clone();
        last_page = page;
    }
    let unique: BTreeSet<&String> = seen.iter().collect();
    assert_eq!(seen.len(), 5);
    assert_eq!(unique.len(), 5);

    let first_cursor = last_page.first_page_cursor.expect("first page cursor");
    let revisited = h
        .cardsearch(&format!("{base}&page[cursor]={first_cursor}"))
        .await;
    assert_eq!(revisited.card_uuids(), first.card_uuids());
    assert_eq!(revisited.total_result_count, TotalCount::Exact(5));
    assert!(revisited.next_page_cursor.is_some());
}

#[tokio::test]
async fn test_back_to_random_first_page_keeps_session() {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let mut uuids = Vec::new();
    for i in 0..5 {
        let focus = format!("https://x/item{i}");
        uuids.push(
            h.save(
                &format!("rec{i}"),
                preprint(&focus, &format!("Item {i}"), "2022-01-01", "https://x/alice", "Alice"),
                &focus,
            )
            .await,
        );
    }
    h.index(&uuids).await;

    let base = "cardSearchFilter[creator]=https://x/alice&page[size]=2";
    let page1 = h.cardsearch(base).await;
    let next = page1.next_page_cursor.clone().expect("next cursor");
    let page2 = h.cardsearch(&format!("{base}&page[cursor]={next}")).await;
    let prev = page2.prev_page_cursor.clone().expect("prev cursor");
    let back = h.cardsearch(&format!("{base}&page[cursor]={prev}")).await;

    assert_eq!(back.total_result_count, TotalCount::Exact(5));
    assert_eq!(back.card_uuids(), page1.card_uuids());
    let forward = back.next_page_cursor.clone().expect("next cursor after going back");
    let page2_again = h.cardsearch(&format!("{base}&page[cursor]={forward}")).await;
    assert_eq!(page2_again.card_uuids(), page2.card_uuids());
}

#[tokio::test]
async fn test_search_without_index_is_not_found() {
    let h = harness();
    let current = h.managed.current_index().indexname();
    for querystring in [
        format!("cardSearchText=x&indexStrategy={current}"),
        "cardSearchText=x".to_string(),
        "cardSearchText=x&indexStrategy=trovesearch_denorm".to_string(),
    ] {
        let params = CardsearchParams::from_querystring(&querystring).unwrap();
        let err = h.managed.pls_handle_cardsearch(&params).await.unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<StrategyError>(),
                Some(StrategyError::IndexNotFound(_))
            ),
            "{querystring}: {err:#}"
        );
    }
    let params = ValuesearchParams::from_querystring("valueSearchPropertyPath=creator").unwrap();
    let err = h.managed.pls_handle_valuesearch(&params).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StrategyError>(),
        Some(StrategyError::IndexNotFound(_))
    ));
}

#[tokio::test]
async fn test_oversized_cursor_is_a_param_error() {
    let (h, _, _) = two_card_corpus().await;
    for start in [i64::MAX - 5, VALUESEARCH_MAX + 1] {
        let cursor = URL_SAFE.encode(format!(
            r#"{{"cursor_version":1,"kind":"simple","start_index":{start},"page_size":5,"result_count":-1}}"#
        ));
        let params = ValuesearchParams::from_querystring(&format!(
            "valueSearchPropertyPath=creator&page[cursor]={cursor}"
        ))
        .unwrap();
        let err = h.managed.pls_handle_valuesearch(&params).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ParamError>(),
            Some(ParamError::InvalidCursor { .. })
        ));
    }
}

fn titled(focus: &str, title: &str) -> RdfGraph {
    let mut g = RdfGraph::new();
    g.add(focus, &dcterms("title"), RdfObject::literal(title));
    g
}

async fn card_uuid_set(h: &Harness, querystring: &str) -> BTreeSet<String> {
    h.cardsearch(querystring)
        .await
        .card_uuids()
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_present_and_absent_partition_cards() {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let with_creator = h
        .save(
            "a",
            preprint("https://x/a", "Has creator", "2020-01-01", "https://x/alice", "Alice"),
            "https://x/a",
        )
        .await;
    let flat = h.save("b", titled("https://x/b", "Depth one only"), "https://x/b").await;
    // the only value two steps out is a date
    let mut dated = titled("https://x/c", "Part of a dated collection");
    dated.add("https://x/c", &dcterms("isPartOf"), RdfObject::iri("https://x/coll"));
    dated.add("https://x/coll", &dcterms("created"), RdfObject::literal("2019-05-06"));
    let dated = h.save("c", dated, "https://x/c").await;
    h.index(&[with_creator.clone(), flat.clone(), dated.clone()]).await;

    let every = BTreeSet::from([with_creator.clone(), flat.clone(), dated.clone()]);
    for path in ["creator", "*", "*.*"] {
        let present = card_uuid_set(&h, &format!("cardSearchFilter[{path}][is-present]")).await;
        let absent = card_uuid_set(&h, &format!("cardSearchFilter[{path}][is-absent]")).await;
        assert!(present.is_disjoint(&absent), "{path}");
        let union: BTreeSet<String> = present.union(&absent).cloned().collect();
        assert_eq!(union, every, "{path}");
    }
    assert_eq!(
        card_uuid_set(&h, "cardSearchFilter[*.*][is-present]").await,
        BTreeSet::from([with_creator, dated])
    );
    assert_eq!(
        card_uuid_set(&h, "cardSearchFilter[*.*][is-absent]").await,
        BTreeSet::from([flat])
    );
}

#[tokio::test]
async fn test_redelivered_message_is_idempotent() {
    let h = harness();
    h.managed.pls_setup().await.unwrap();
    let uuid = h
        .save(
            "a",
            preprint("https://x/a", "Only card", "2020-01-01", "https://x/alice", "Alice"),
            "https://x/a",
        )
        .await;
    let index = h.managed.current_index().indexname();
    let chunk = MessagesChunk::new(MessageType::UpdateIndexcard, vec![uuid.clone()]);

    let first = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
    assert!(first.iter().all(|r| r.is_done));
    let doc_before = serde_json::to_string(&h.engine.get_doc(&index, &uuid).unwrap()).unwrap();
    let count_before = h.engine.total_doc_count();

    let again = h.managed.pls_handle_messages_chunk(&chunk).await.unwrap();
    assert!(again.iter().all(|r| r.is_done));
    let doc_after = serde_json::to_string(&h.engine.get_doc(&index, &uuid).unwrap()).unwrap();
    assert_eq!(doc_before, doc_after);
    assert_eq!(h.engine.total_doc_count(), count_before);

    let found = h.cardsearch("cardSearchText=card").await;
    assert_eq!(found.total_result_count, TotalCount::Exact(1));
    assert_eq!(found.card_uuids(), vec![uuid.as_str()]);
}

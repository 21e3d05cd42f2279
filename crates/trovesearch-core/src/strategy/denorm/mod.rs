//! The denormalized trovesearch strategy.
//!
//! Every indexcard becomes one card doc plus one iri-value doc per IRI it
//! reaches (see [`crate::sourcedoc`]). Cardsearch queries card docs;
//! valuesearch aggregates iri-value docs, whose copy of the card fields lets
//! a cardsearch constrain which values are counted.
//!
//! Field names under `*_by_propertypath` are encoded paths, so the mapping
//! relies on dynamic templates: `dynamic: false` everywhere except the
//! text, date, and integer buckets.

pub mod query;

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cursor::{CardsearchCursor, SimpleCursor, MANY_MORE};
use crate::engine::{IndexDefinition, SearchEngine};
use crate::messages::{MessageType, MessagesChunk};
use crate::params::{CardsearchParams, ValuesearchParams};
use crate::propertypath::Propertypath;
use crate::query::{BoolQuery, Query, SearchResponse, TotalRelation};
use crate::response::{
    CardsearchResponse, CardsearchResult, PropertypathUsage, TextMatchEvidence, TotalCount,
    ValuesearchResponse, ValuesearchResult,
};
use crate::sourcedoc::SourcedocBuilder;
use crate::store::IndexcardSource;
use crate::vocab;

use self::query::{
    build_cardsearch_request, build_date_valuesearch_request, build_iri_valuesearch_request,
    AGG_RELATED_PROPERTYPATH_USAGE, AGG_TYPE_IRI, AGG_VALUESEARCH_DATES, AGG_VALUESEARCH_IRIS,
    AGG_VALUE_LABEL, AGG_VALUE_NAME, AGG_VALUE_TITLE, CARD_IRI_FIELD, CARD_UUID_FIELD,
};
use super::{DocAction, IndexStrategy, MessageActionSet};

pub const STRATEGY_NAME: &str = "trovesearch_denorm";

const SUPPORTED_MESSAGE_TYPES: [MessageType; 2] =
    [MessageType::UpdateIndexcard, MessageType::BackfillIndexcard];

fn keyword_mapping() -> Value {
    json!({"type": "keyword", "ignore_above": 8191})
}

fn flattened_mapping() -> Value {
    json!({"type": "flattened", "ignore_above": 8191})
}

fn iri_keyword_mapping() -> Value {
    json!({
        "type": "object",
        "properties": {
            "exact": keyword_mapping(),
            "suffuniq": keyword_mapping(),
        },
    })
}

fn text_mapping() -> Value {
    json!({"type": "text", "index_options": "offsets"})
}

fn with_paths_and_values(mut mappings: Value) -> Value {
    let dynamic_object = json!({"type": "object", "dynamic": true});
    if let Value::Object(map) = &mut mappings {
        map.insert("focus_iri".into(), iri_keyword_mapping());
        map.insert("propertypaths_present".into(), keyword_mapping());
        map.insert("iri_by_propertypath".into(), flattened_mapping());
        map.insert("iri_by_depth".into(), flattened_mapping());
        for bucket in [
            "text_by_propertypath",
            "text_by_depth",
            "date_by_propertypath",
            "int_by_propertypath",
        ] {
            map.insert(bucket.into(), dynamic_object.clone());
        }
    }
    mappings
}

#[derive(Debug, Default)]
pub struct TrovesearchDenorm;

impl TrovesearchDenorm {
    pub fn new() -> Self {
        Self
    }

    fn dynamic_templates() -> Value {
        json!([
            {"dynamic_text_by_propertypath": {
                "path_match": "*.text_by_propertypath.*",
                "mapping": text_mapping(),
            }},
            {"dynamic_text_by_depth": {
                "path_match": "*.text_by_depth.*",
                "mapping": text_mapping(),
            }},
            {"dynamic_date_by_propertypath": {
                "path_match": "*.date_by_propertypath.*",
                "mapping": {"type": "date", "format": "strict_date_optional_time"},
            }},
            {"dynamic_int_by_propertypath": {
                "path_match": "*.int_by_propertypath.*",
                "mapping": {"type": "long"},
            }},
        ])
    }

    fn card_mappings() -> Value {
        with_paths_and_values(json!({
            "card_iri": keyword_mapping(),
            "card_uuid": keyword_mapping(),
            "suid": {
                "type": "object",
                "properties": {
                    "source_config_label": keyword_mapping(),
                    "source_record_identifier": keyword_mapping(),
                },
            },
        }))
    }

    fn iri_value_mappings() -> Value {
        with_paths_and_values(json!({
            "value_iri": keyword_mapping(),
            "value_iris": iri_keyword_mapping(),
            "value_type": keyword_mapping(),
            "value_name": keyword_mapping(),
            "value_title": keyword_mapping(),
            "value_label": keyword_mapping(),
            "at_card_propertypaths": keyword_mapping(),
        }))
    }
}

#[async_trait]
impl IndexStrategy for TrovesearchDenorm {
    fn strategy_name(&self) -> &str {
        STRATEGY_NAME
    }

    fn index_definition(&self) -> IndexDefinition {
        IndexDefinition {
            settings: json!({}),
            mappings: json!({
                "dynamic": "false",
                "dynamic_templates": Self::dynamic_templates(),
                "properties": {
                    "card": {"properties": Self::card_mappings()},
                    "iri_value": {"properties": Self::iri_value_mappings()},
                },
            }),
        }
    }

    fn supported_message_types(&self) -> &[MessageType] {
        &SUPPORTED_MESSAGE_TYPES
    }

    fn backfill_message_type(&self) -> MessageType {
        MessageType::BackfillIndexcard
    }

    /// Index docs for each indexable card; delete the card doc of any
    /// target that is missing, deleted, or skipped.
    async fn build_actions(
        &self,
        source: &dyn IndexcardSource,
        chunk: &MessagesChunk,
    ) -> Result<Vec<MessageActionSet>> {
        let cards = source.latest_rdf_for_indexcards(&chunk.target_ids).await?;
        let mut remaining: BTreeSet<&str> = chunk.target_ids.iter().map(String::as_str).collect();
        let mut action_sets = Vec::with_capacity(chunk.target_ids.len());
        for card in &cards {
            let builder = SourcedocBuilder::new(card);
            if builder.should_skip() {
                continue;
            }
            let mut actions = vec![DocAction::Index {
                id: builder.card_doc_id().to_string(),
                doc: builder.build_card_doc(),
            }];
            actions.extend(
                builder
                    .build_iri_value_docs()
                    .into_iter()
                    .map(|(id, doc)| DocAction::Index { id, doc }),
            );
            remaining.remove(card.indexcard_uuid.as_str());
            action_sets.push(MessageActionSet {
                target_id: card.indexcard_uuid.clone(),
                actions,
            });
        }
        for uuid in remaining {
            action_sets.push(MessageActionSet {
                target_id: uuid.to_string(),
                actions: vec![DocAction::Delete {
                    id: uuid.to_string(),
                }],
            });
        }
        Ok(action_sets)
    }

    /// Drop every iri-value doc of the chunk's cards; the bulk request
    /// re-creates the ones that still apply.
    async fn before_chunk(
        &self,
        engine: &dyn SearchEngine,
        chunk: &MessagesChunk,
        indexnames: &[String],
    ) -> Result<()> {
        let query = Query::Bool(BoolQuery {
            must: vec![
                Query::terms(CARD_UUID_FIELD, chunk.target_ids.iter().cloned()),
                Query::exists("iri_value.value_iri"),
            ],
            ..Default::default()
        });
        let deleted = engine.delete_by_query(indexnames, &query).await?;
        debug!(deleted, "cleared iri-value docs");
        Ok(())
    }

    async fn handle_cardsearch(
        &self,
        engine: &dyn SearchEngine,
        indexname: &str,
        params: &CardsearchParams,
    ) -> Result<CardsearchResponse> {
        let mut cursor =
            CardsearchCursor::from_page_param(&params.page, params.wants_random_sort())?;
        let request = build_cardsearch_request(params, &cursor);
        debug!(index = indexname, from = request.from, size = request.size, "cardsearch");
        let response = engine.search(indexname, &request).await?;
        Ok(cardsearch_response(params, &response, &mut cursor))
    }

    async fn handle_valuesearch(
        &self,
        engine: &dyn SearchEngine,
        indexname: &str,
        params: &ValuesearchParams,
    ) -> Result<ValuesearchResponse> {
        if params.is_date_valuesearch() {
            let request = build_date_valuesearch_request(params);
            debug!(index = indexname, "date valuesearch");
            let response = engine.search(indexname, &request).await?;
            return Ok(date_valuesearch_response(&response));
        }
        let mut cursor = SimpleCursor::from_page_param(&params.cardsearch.page)?;
        let request = build_iri_valuesearch_request(params, &cursor);
        debug!(index = indexname, start = cursor.start_index, "iri valuesearch");
        let response = engine.search(indexname, &request).await?;
        Ok(iri_valuesearch_response(&response, &mut cursor))
    }
}

fn cardsearch_response(
    params: &CardsearchParams,
    response: &SearchResponse,
    cursor: &mut CardsearchCursor,
) -> CardsearchResponse {
    let total = &response.hits.total;
    let replaying_first_page = cursor.is_first_page() && !cursor.first_page_ids.is_empty();
    if replaying_first_page && cursor.result_count().is_some() {
        // the query was narrowed to the captured ids; keep the session's count
    } else if total.relation != TotalRelation::Eq {
        cursor.set_result_count(MANY_MORE);
    } else {
        let mut count = total.value as i64;
        if cursor.random_sort && !cursor.is_first_page() {
            // the captured first page is filtered out of later pages
            count = count.saturating_add(cursor.first_page_ids.len() as i64);
        }
        cursor.set_result_count(count);
    }

    let mut results: Vec<CardsearchResult> = response
        .hits
        .hits
        .iter()
        .map(|hit| {
            let card_iri = hit
                .first_field_str(CARD_IRI_FIELD)
                .map(str::to_string)
                .unwrap_or_else(|| vocab::indexcard_iri(&hit.id));
            let text_match_evidence = hit
                .highlight
                .iter()
                .flat_map(|(field, snippets)| {
                    let path = field
                        .rsplit_once('.')
                        .and_then(|(_, encoded)| Propertypath::from_field_name(encoded).ok());
                    if path.is_none() {
                        warn!(%field, "unparseable highlight field");
                    }
                    path.into_iter().flat_map(move |path| {
                        snippets.iter().map(move |snippet| (path.clone(), snippet))
                    })
                })
                .map(|(property_path, snippet)| TextMatchEvidence {
                    property_path,
                    matching_highlight: snippet.clone(),
                    card_iri: card_iri.clone(),
                })
                .collect();
            CardsearchResult {
                card_iri,
                card_uuid: hit.id.clone(),
                text_match_evidence,
            }
        })
        .collect();

    if replaying_first_page {
        // revisiting page one: reproduce its original order
        let position = |uuid: &str| {
            cursor
                .first_page_ids
                .iter()
                .position(|id| id == uuid)
                .unwrap_or(usize::MAX)
        };
        results.sort_by_key(|r| position(&r.card_uuid));
    } else if cursor.random_sort
        && cursor.is_first_page()
        && cursor.first_page_ids.is_empty()
        && !cursor.has_many_more()
        && params
            .cardsearch_filter_set
            .iter()
            .any(|filter| !filter.is_type_filter())
    {
        cursor.first_page_ids = results.iter().map(|r| r.card_uuid.clone()).collect();
    }

    let mut related_propertypath_results: Vec<PropertypathUsage> = params
        .related_propertypath_set
        .iter()
        .map(|path| PropertypathUsage {
            property_path: path.clone(),
            usage_count: 0,
        })
        .collect();
    for bucket in response.buckets(AGG_RELATED_PROPERTYPATH_USAGE) {
        let Ok(path) = Propertypath::from_keyword(&bucket.key_string()) else {
            continue;
        };
        if let Some(usage) = related_propertypath_results
            .iter_mut()
            .find(|usage| usage.property_path == path)
        {
            usage.usage_count += bucket.doc_count;
        }
    }

    CardsearchResponse {
        total_result_count: if cursor.has_many_more() {
            TotalCount::ManyMore
        } else {
            TotalCount::Exact(cursor.result_count().unwrap_or(0).max(0) as u64)
        },
        search_result_page: results,
        related_propertypath_results,
        next_page_cursor: cursor.next_cursor(),
        prev_page_cursor: cursor.prev_cursor(),
        first_page_cursor: cursor.first_cursor(),
    }
}

fn iri_valuesearch_response(
    response: &SearchResponse,
    cursor: &mut SimpleCursor,
) -> ValuesearchResponse {
    let buckets = response.buckets(AGG_VALUESEARCH_IRIS);
    let start = cursor.start_index.max(0) as usize;
    let page_end = start.saturating_add(cursor.page_size.max(0) as usize);
    // one bucket past the page end means another page exists
    cursor.result_count = Some(if buckets.len() > page_end {
        MANY_MORE
    } else {
        buckets.len() as i64
    });
    let page = buckets.get(start..page_end.min(buckets.len())).unwrap_or(&[]);
    ValuesearchResponse {
        search_result_page: page
            .iter()
            .map(|bucket| ValuesearchResult {
                value_iri: Some(bucket.key_string()),
                value_value: None,
                value_type: bucket.sub_keys(AGG_TYPE_IRI),
                name_text: bucket.sub_keys(AGG_VALUE_NAME),
                title_text: bucket.sub_keys(AGG_VALUE_TITLE),
                label_text: bucket.sub_keys(AGG_VALUE_LABEL),
                match_count: bucket.doc_count,
            })
            .collect(),
        next_page_cursor: cursor.next_cursor(),
        prev_page_cursor: cursor.prev_cursor(),
        first_page_cursor: cursor.first_cursor(),
    }
}

fn date_valuesearch_response(response: &SearchResponse) -> ValuesearchResponse {
    ValuesearchResponse {
        search_result_page: response
            .buckets(AGG_VALUESEARCH_DATES)
            .iter()
            .map(|bucket| {
                let year = bucket.key_string();
                ValuesearchResult {
                    value_value: Some(year.clone()),
                    label_text: vec![year],
                    match_count: bucket.doc_count,
                    ..Default::default()
                }
            })
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryEngine;
    use crate::query::{Bucket, Hit, Hits, TotalHits};
    use crate::rdf::{RdfGraph, RdfObject};
    use crate::store::memory::InMemoryIndexcardStore;
    use crate::store::{IndexcardStore, SourceRecordKey};
    use crate::vocab::{dcterms, foaf, osfmap, rdf};
    use std::collections::BTreeMap;

    fn preprint(focus: &str, title: &str, created: &str) -> RdfGraph {
        let mut g = RdfGraph::new();
        g.add(focus, &rdf("type"), RdfObject::iri(osfmap("Preprint")));
        g.add(focus, &dcterms("title"), RdfObject::literal(title));
        g.add(focus, &dcterms("created"), RdfObject::literal(created));
        g.add(focus, &dcterms("creator"), RdfObject::iri("https://x/alice"));
        g.add("https://x/alice", &foaf("name"), RdfObject::literal("Alice"));
        g
    }

    #[test]
    fn test_definition_is_stable() {
        let strategy = TrovesearchDenorm::new();
        assert_eq!(strategy.strategy_check(), TrovesearchDenorm::new().strategy_check());
        let definition = strategy.index_definition();
        assert_eq!(definition.mappings["dynamic"], json!("false"));
        let card = &definition.mappings["properties"]["card"]["properties"];
        assert_eq!(card["iri_by_propertypath"]["type"], json!("flattened"));
        assert_eq!(card["card_uuid"]["ignore_above"], json!(8191));
        let iri_value = &definition.mappings["properties"]["iri_value"]["properties"];
        assert_eq!(iri_value["value_type"]["type"], json!("keyword"));
    }

    #[tokio::test]
    async fn test_build_actions_indexes_and_deletes() {
        let store = InMemoryIndexcardStore::new();
        let card = store
            .save_indexcard_from_graph(
                &SourceRecordKey::new("src", "rec-1"),
                "https://x/a",
                &preprint("https://x/a", "A title", "2020-03-04"),
            )
            .await
            .unwrap();
        let chunk = MessagesChunk::new(
            MessageType::UpdateIndexcard,
            vec![card.uuid.clone(), "unknown-uuid".into()],
        );
        let sets = TrovesearchDenorm::new()
            .build_actions(&store, &chunk)
            .await
            .unwrap();
        assert_eq!(sets.len(), 2);
        let indexed = sets.iter().find(|s| s.target_id == card.uuid).unwrap();
        // card doc plus iri-value docs for the creator and the type
        assert_eq!(indexed.actions.len(), 3);
        assert_eq!(indexed.actions[0].doc_id(), card.uuid);
        let deleted = sets.iter().find(|s| s.target_id == "unknown-uuid").unwrap();
        assert_eq!(
            deleted.actions,
            vec![DocAction::Delete {
                id: "unknown-uuid".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_before_chunk_clears_iri_value_docs() {
        let engine = InMemoryEngine::new();
        let definition = TrovesearchDenorm::new().index_definition();
        engine.create_index("i", &definition).await.unwrap();
        engine
            .bulk(&[
                crate::engine::BulkAction::Index {
                    index: "i".into(),
                    id: "u1".into(),
                    doc: json!({"card": {"card_uuid": "u1"}}),
                },
                crate::engine::BulkAction::Index {
                    index: "i".into(),
                    id: "u1-x".into(),
                    doc: json!({"card": {"card_uuid": "u1"}, "iri_value": {"value_iri": "x"}}),
                },
                crate::engine::BulkAction::Index {
                    index: "i".into(),
                    id: "u2-x".into(),
                    doc: json!({"card": {"card_uuid": "u2"}, "iri_value": {"value_iri": "x"}}),
                },
            ])
            .await
            .unwrap();
        let chunk = MessagesChunk::new(MessageType::UpdateIndexcard, vec!["u1".into()]);
        TrovesearchDenorm::new()
            .before_chunk(&engine, &chunk, &["i".to_string()])
            .await
            .unwrap();
        assert!(engine.get_doc("i", "u1").is_some());
        assert!(engine.get_doc("i", "u1-x").is_none());
        assert!(engine.get_doc("i", "u2-x").is_some());
    }

    fn hit(id: &str) -> Hit {
        Hit {
            id: id.into(),
            fields: BTreeMap::from([(
                CARD_IRI_FIELD.to_string(),
                vec![json!(vocab::indexcard_iri(id))],
            )]),
            ..Default::default()
        }
    }

    fn response_with(ids: &[&str], total: u64) -> SearchResponse {
        SearchResponse {
            hits: Hits {
                total: TotalHits {
                    value: total,
                    relation: TotalRelation::Eq,
                },
                hits: ids.iter().map(|id| hit(id)).collect(),
            },
            aggregations: BTreeMap::new(),
        }
    }

    #[test]
    fn test_cardsearch_response_captures_first_page() {
        let params =
            CardsearchParams::from_querystring("cardSearchFilter[creator]=https://x/alice&page[size]=2")
                .unwrap();
        let mut cursor = CardsearchCursor::from_page_param(&params.page, true).unwrap();
        let response = cardsearch_response(&params, &response_with(&["b", "a"], 5), &mut cursor);
        assert_eq!(response.total_result_count, TotalCount::Exact(5));
        assert_eq!(cursor.first_page_ids, vec!["b", "a"]);
        assert!(response.next_page_cursor.is_some());
        assert_eq!(response.search_result_page[0].card_iri, vocab::indexcard_iri("b"));
    }

    #[test]
    fn test_cardsearch_response_type_filter_only_stays_unnavigable() {
        let params =
            CardsearchParams::from_querystring("cardSearchFilter[resourceType]=Preprint").unwrap();
        let mut cursor = CardsearchCursor::from_page_param(&params.page, true).unwrap();
        let response = cardsearch_response(&params, &response_with(&["a"], 40), &mut cursor);
        assert!(cursor.first_page_ids.is_empty());
        assert_eq!(response.next_page_cursor, None);
    }

    #[test]
    fn test_cardsearch_response_reorders_revisited_first_page() {
        let params = CardsearchParams::from_querystring("cardSearchFilter[creator]=https://x/alice")
            .unwrap();
        let mut cursor = CardsearchCursor::from_page_param(&params.page, true).unwrap();
        cursor.first_page_ids = vec!["c".into(), "a".into(), "b".into()];
        let response = cardsearch_response(&params, &response_with(&["a", "b", "c"], 3), &mut cursor);
        assert_eq!(response.card_uuids(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cardsearch_back_to_first_page_keeps_session() {
        let params =
            CardsearchParams::from_querystring("cardSearchFilter[creator]=https://x/alice&page[size]=2")
                .unwrap();
        let mut first = CardsearchCursor::from_page_param(&params.page, true).unwrap();
        let page1 = cardsearch_response(&params, &response_with(&["b", "a"], 5), &mut first);
        assert_eq!(page1.total_result_count, TotalCount::Exact(5));

        let mut page = params.page.clone();
        page.cursor = page1.next_page_cursor.clone();
        let mut second = CardsearchCursor::from_page_param(&page, true).unwrap();
        // later pages exclude the two captured ids
        let page2 = cardsearch_response(&params, &response_with(&["d", "c"], 3), &mut second);
        assert_eq!(page2.total_result_count, TotalCount::Exact(5));

        page.cursor = page2.prev_page_cursor.clone();
        let mut revisit = CardsearchCursor::from_page_param(&page, true).unwrap();
        assert!(revisit.is_first_page());
        // narrowed to the captured ids, so the engine only counts two
        let again = cardsearch_response(&params, &response_with(&["a", "b"], 2), &mut revisit);
        assert_eq!(again.total_result_count, TotalCount::Exact(5));
        assert_eq!(again.card_uuids(), vec!["b", "a"]);
        assert!(again.next_page_cursor.is_some());
        assert_eq!(again.next_page_cursor, page1.next_page_cursor);
    }

    #[test]
    fn test_cardsearch_response_many_more_and_evidence() {
        let params = CardsearchParams::from_querystring("cardSearchText=word").unwrap();
        let mut cursor = CardsearchCursor::from_page_param(&params.page, false).unwrap();
        let title = Propertypath::new([dcterms("title")]);
        let mut h = hit("a");
        h.highlight.insert(
            format!("card.text_by_propertypath.{}", title.field_name()),
            vec!["a <em>word</em>".into()],
        );
        let response = SearchResponse {
            hits: Hits {
                total: TotalHits {
                    value: 10_000,
                    relation: TotalRelation::Gte,
                },
                hits: vec![h],
            },
            aggregations: BTreeMap::new(),
        };
        let response = cardsearch_response(&params, &response, &mut cursor);
        assert_eq!(response.total_result_count, TotalCount::ManyMore);
        let evidence = &response.search_result_page[0].text_match_evidence;
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].property_path, title);
        assert_eq!(evidence[0].matching_highlight, "a <em>word</em>");
    }

    fn iri_bucket(key: &str, count: u64) -> Bucket {
        Bucket {
            key: json!(key),
            key_as_string: None,
            doc_count: count,
            aggs: BTreeMap::new(),
        }
    }

    #[test]
    fn test_iri_valuesearch_pagination() {
        let mut response = SearchResponse::default();
        response.aggregations.insert(
            AGG_VALUESEARCH_IRIS.into(),
            crate::query::AggregationResult {
                buckets: vec![iri_bucket("x", 3), iri_bucket("y", 2), iri_bucket("z", 1)],
            },
        );
        let mut cursor = SimpleCursor::new(2);
        let page = iri_valuesearch_response(&response, &mut cursor);
        assert_eq!(page.search_result_page.len(), 2);
        assert_eq!(page.search_result_page[0].value_iri.as_deref(), Some("x"));
        assert!(cursor.has_many_more());
        assert!(page.next_page_cursor.is_some());

        let mut last = SimpleCursor::new(2);
        last.start_index = 2;
        let page = iri_valuesearch_response(&response, &mut last);
        assert_eq!(page.search_result_page.len(), 1);
        assert_eq!(last.result_count, Some(3));
        assert!(page.next_page_cursor.is_none());
        assert!(page.prev_page_cursor.is_some());
    }
}

//! Engine query model.
//!
//! A small typed subset of the Elasticsearch 8 query DSL: enough to express
//! every cardsearch and valuesearch query, serializable to engine JSON with
//! [`Query::to_json`] and evaluated directly by
//! [`InMemoryEngine`](crate::engine::memory::InMemoryEngine).
//!
//! | Type | ES counterpart |
//! |------|----------------|
//! | [`Query`] | `query` clauses (`bool`, `term`, `range`, `match_phrase`, ...) |
//! | [`Aggregation`] | `terms` and `date_histogram` aggregations |
//! | [`SearchRequest`] | `_search` request body |
//! | [`SearchResponse`] | `_search` response body |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub filter: Vec<Query>,
    pub must: Vec<Query>,
    pub must_not: Vec<Query>,
    pub should: Vec<Query>,
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
            && self.must.is_empty()
            && self.must_not.is_empty()
            && self.should.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RandomScore {
    pub seed: Option<String>,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Bool(BoolQuery),
    Term {
        field: String,
        value: String,
    },
    Terms {
        field: String,
        values: Vec<String>,
    },
    Exists {
        field: String,
    },
    /// Bounds are date-math strings (`2020||/y`) or plain values.
    Range {
        field: String,
        gt: Option<String>,
        gte: Option<String>,
        lt: Option<String>,
        lte: Option<String>,
    },
    MatchPhrase {
        field: String,
        query: String,
        slop: u32,
    },
    MatchPhrasePrefix {
        field: String,
        query: String,
    },
    /// Any-word match; `fuzzy` means `fuzziness: AUTO`.
    Match {
        field: String,
        query: String,
        fuzzy: bool,
    },
    /// Score by a random function, ignoring the inner query's score.
    FunctionScore {
        query: Box<Query>,
        random_score: RandomScore,
    },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists {
            field: field.into(),
        }
    }

    /// One query unchanged, or a `should` of all with at least one required.
    pub fn any_of(mut queries: Vec<Query>) -> Self {
        if queries.len() == 1 {
            return queries.remove(0);
        }
        Query::Bool(BoolQuery {
            should: queries,
            minimum_should_match: Some(1),
            ..Default::default()
        })
    }

    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({"match_all": {}}),
            Query::Bool(b) => {
                let mut body = Map::new();
                for (key, clauses) in [
                    ("filter", &b.filter),
                    ("must", &b.must),
                    ("must_not", &b.must_not),
                    ("should", &b.should),
                ] {
                    if !clauses.is_empty() {
                        body.insert(
                            key.into(),
                            Value::Array(clauses.iter().map(Query::to_json).collect()),
                        );
                    }
                }
                if let Some(min) = b.minimum_should_match {
                    body.insert("minimum_should_match".into(), json!(min));
                }
                json!({ "bool": body })
            }
            Query::Term { field, value } => json!({"term": { field: value }}),
            Query::Terms { field, values } => json!({"terms": { field: values }}),
            Query::Exists { field } => json!({"exists": {"field": field}}),
            Query::Range {
                field,
                gt,
                gte,
                lt,
                lte,
            } => {
                let mut bounds = Map::new();
                for (key, bound) in [("gt", gt), ("gte", gte), ("lt", lt), ("lte", lte)] {
                    if let Some(bound) = bound {
                        bounds.insert(key.into(), json!(bound));
                    }
                }
                json!({"range": { field: bounds }})
            }
            Query::MatchPhrase { field, query, slop } => {
                if *slop == 0 {
                    json!({"match_phrase": { field: {"query": query} }})
                } else {
                    json!({"match_phrase": { field: {"query": query, "slop": slop} }})
                }
            }
            Query::MatchPhrasePrefix { field, query } => {
                json!({"match_phrase_prefix": { field: {"query": query} }})
            }
            Query::Match {
                field,
                query,
                fuzzy,
            } => {
                if *fuzzy {
                    json!({"match": { field: {"query": query, "fuzziness": "AUTO"} }})
                } else {
                    json!({"match": { field: {"query": query} }})
                }
            }
            Query::FunctionScore {
                query,
                random_score,
            } => {
                let mut random = Map::new();
                if let Some(seed) = &random_score.seed {
                    random.insert("seed".into(), json!(seed));
                }
                if let Some(field) = &random_score.field {
                    random.insert("field".into(), json!(field));
                }
                json!({"function_score": {
                    "query": query.to_json(),
                    "boost_mode": "replace",
                    "random_score": random,
                }})
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Terms {
        field: String,
        include: Option<Vec<String>>,
        size: usize,
        aggs: BTreeMap<String, Aggregation>,
    },
    /// Per-year histogram, keys formatted `yyyy`.
    YearHistogram {
        field: String,
        descending: bool,
        min_doc_count: u64,
    },
}

impl Aggregation {
    pub fn terms(field: impl Into<String>, size: usize) -> Self {
        Aggregation::Terms {
            field: field.into(),
            include: None,
            size,
            aggs: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms {
                field,
                include,
                size,
                aggs,
            } => {
                let mut terms = Map::new();
                terms.insert("field".into(), json!(field));
                terms.insert("size".into(), json!(size));
                if let Some(include) = include {
                    terms.insert("include".into(), json!(include));
                }
                let mut body = Map::new();
                body.insert("terms".into(), Value::Object(terms));
                if !aggs.is_empty() {
                    body.insert("aggs".into(), aggs_to_json(aggs));
                }
                Value::Object(body)
            }
            Aggregation::YearHistogram {
                field,
                descending,
                min_doc_count,
            } => json!({"date_histogram": {
                "field": field,
                "calendar_interval": "year",
                "format": "yyyy",
                "order": {"_key": if *descending { "desc" } else { "asc" }},
                "min_doc_count": min_doc_count,
            }}),
        }
    }
}

fn aggs_to_json(aggs: &BTreeMap<String, Aggregation>) -> Value {
    Value::Object(
        aggs.iter()
            .map(|(name, agg)| (name.clone(), agg.to_json()))
            .collect(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub from: usize,
    pub size: usize,
    pub sort: Vec<SortField>,
    pub aggs: BTreeMap<String, Aggregation>,
    pub docvalue_fields: Vec<String>,
    pub highlight_fields: Vec<String>,
    pub source: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: Query::MatchAll,
            from: 0,
            size: 10,
            sort: Vec::new(),
            aggs: BTreeMap::new(),
            docvalue_fields: Vec::new(),
            highlight_fields: Vec::new(),
            source: false,
        }
    }
}

impl SearchRequest {
    pub fn to_json(&self, track_total_hits: u64) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.query.to_json());
        body.insert("from".into(), json!(self.from));
        body.insert("size".into(), json!(self.size));
        body.insert("_source".into(), json!(self.source));
        body.insert("track_total_hits".into(), json!(track_total_hits));
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| json!({ &s.field: {"order": if s.descending { "desc" } else { "asc" }} }))
                .collect();
            body.insert("sort".into(), Value::Array(sort));
        }
        if !self.aggs.is_empty() {
            body.insert("aggs".into(), aggs_to_json(&self.aggs));
        }
        if !self.docvalue_fields.is_empty() {
            body.insert("docvalue_fields".into(), json!(self.docvalue_fields));
        }
        if !self.highlight_fields.is_empty() {
            let fields: Map<String, Value> = self
                .highlight_fields
                .iter()
                .map(|f| (f.clone(), json!({})))
                .collect();
            body.insert(
                "highlight".into(),
                json!({"require_field_match": false, "fields": fields}),
            );
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TotalRelation {
    #[default]
    Eq,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TotalHits {
    pub value: u64,
    pub relation: TotalRelation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub highlight: BTreeMap<String, Vec<String>>,
}

impl Hit {
    pub fn first_field_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field)?.first()?.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Hits {
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub doc_count: u64,
    #[serde(flatten)]
    pub aggs: BTreeMap<String, AggregationResult>,
}

impl Bucket {
    /// String keys as-is; numeric keys prefer `key_as_string`.
    pub fn key_string(&self) -> String {
        match (&self.key, &self.key_as_string) {
            (Value::String(key), _) => key.clone(),
            (_, Some(formatted)) => formatted.clone(),
            (other, None) => other.to_string(),
        }
    }

    pub fn sub_keys(&self, agg_name: &str) -> Vec<String> {
        self.aggs
            .get(agg_name)
            .map(|agg| agg.buckets.iter().map(Bucket::key_string).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AggregationResult {
    #[serde(default)]
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub hits: Hits,
    #[serde(default)]
    pub aggregations: BTreeMap<String, AggregationResult>,
}

impl SearchResponse {
    pub fn buckets(&self, agg_name: &str) -> &[Bucket] {
        self.aggregations
            .get(agg_name)
            .map(|agg| agg.buckets.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_query_omits_empty_clauses() {
        let query = Query::Bool(BoolQuery {
            filter: vec![Query::term("card.propertypaths_present", "[\"x\"]")],
            must_not: vec![Query::exists("iri_value")],
            ..Default::default()
        });
        assert_eq!(
            query.to_json(),
            json!({"bool": {
                "filter": [{"term": {"card.propertypaths_present": "[\"x\"]"}}],
                "must_not": [{"exists": {"field": "iri_value"}}],
            }})
        );
    }

    #[test]
    fn test_any_of_single_is_unwrapped() {
        let single = Query::any_of(vec![Query::exists("a")]);
        assert_eq!(single, Query::exists("a"));
        let several = Query::any_of(vec![Query::exists("a"), Query::exists("b")]);
        assert_eq!(several.to_json()["bool"]["minimum_should_match"], 1);
    }

    #[test]
    fn test_function_score_json() {
        let query = Query::FunctionScore {
            query: Box::new(Query::MatchAll),
            random_score: RandomScore {
                seed: Some("a|b".into()),
                field: Some("card.card_uuid".into()),
            },
        };
        let json = query.to_json();
        assert_eq!(json["function_score"]["boost_mode"], "replace");
        assert_eq!(json["function_score"]["random_score"]["seed"], "a|b");
    }

    #[test]
    fn test_request_json() {
        let mut aggs = BTreeMap::new();
        aggs.insert(
            "agg_valuesearch_dates".to_string(),
            Aggregation::YearHistogram {
                field: "card.date_by_propertypath.x".into(),
                descending: true,
                min_doc_count: 1,
            },
        );
        let request = SearchRequest {
            size: 0,
            aggs,
            sort: vec![SortField {
                field: "card.date_by_propertypath.x".into(),
                descending: true,
            }],
            ..Default::default()
        };
        let json = request.to_json(10_000);
        assert_eq!(json["size"], 0);
        assert_eq!(json["track_total_hits"], 10_000);
        assert_eq!(
            json["aggs"]["agg_valuesearch_dates"]["date_histogram"]["order"]["_key"],
            "desc"
        );
        assert_eq!(json["sort"][0]["card.date_by_propertypath.x"]["order"], "desc");
    }

    #[test]
    fn test_parse_engine_response() {
        let raw = json!({
            "took": 3,
            "hits": {
                "total": {"value": 10000, "relation": "gte"},
                "hits": [{
                    "_id": "abc",
                    "_score": 1.0,
                    "fields": {"card.card_iri": ["https://x/card/abc"]},
                    "highlight": {"card.text_by_propertypath.WyJ4Il0=": ["<em>hello</em>"]},
                }],
            },
            "aggregations": {
                "agg_valuesearch_iris": {
                    "doc_count_error_upper_bound": 0,
                    "buckets": [{
                        "key": "https://x/pat",
                        "doc_count": 2,
                        "agg_value_name": {"buckets": [{"key": "Pat", "doc_count": 2}]},
                    }],
                },
                "agg_valuesearch_dates": {
                    "buckets": [{"key": 1577836800000_u64, "key_as_string": "2020", "doc_count": 1}],
                },
            },
        });
        let response: SearchResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(response.hits.total.relation, TotalRelation::Gte);
        assert_eq!(
            response.hits.hits[0].first_field_str("card.card_iri"),
            Some("https://x/card/abc")
        );
        let iri_bucket = &response.buckets("agg_valuesearch_iris")[0];
        assert_eq!(iri_bucket.key_string(), "https://x/pat");
        assert_eq!(iri_bucket.sub_keys("agg_value_name"), vec!["Pat"]);
        assert_eq!(response.buckets("agg_valuesearch_dates")[0].key_string(), "2020");
        assert!(response.buckets("missing").is_empty());
    }
}

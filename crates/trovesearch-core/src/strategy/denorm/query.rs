//! Engine requests for the denormalized document shape.
//!
//! Card docs and iri-value docs share the paths-and-values fields, so a
//! [`QueryHelper`] is parameterized by its base field (`card` or
//! `iri_value`) and contributes clauses to one [`BoolQuery`].

use std::collections::BTreeSet;

use crate::cursor::{CardsearchCursor, SimpleCursor};
use crate::iri::sufficiently_unique_iri;
use crate::params::{
    daterange_value, CardsearchParams, FilterOperator, SearchFilter, Textsegment,
    ValuesearchParams,
};
use crate::propertypath::{depth_field_name, Propertypath};
use crate::query::{Aggregation, BoolQuery, Query, RandomScore, SearchRequest, SortField};
use crate::vocab;

pub const AGG_RELATED_PROPERTYPATH_USAGE: &str = "agg_related_propertypath_usage";
pub const AGG_VALUESEARCH_IRIS: &str = "agg_valuesearch_iris";
pub const AGG_VALUESEARCH_DATES: &str = "agg_valuesearch_dates";
pub const AGG_TYPE_IRI: &str = "agg_type_iri";
pub const AGG_VALUE_NAME: &str = "agg_value_name";
pub const AGG_VALUE_TITLE: &str = "agg_value_title";
pub const AGG_VALUE_LABEL: &str = "agg_value_label";

pub const CARD_IRI_FIELD: &str = "card.card_iri";
pub const CARD_UUID_FIELD: &str = "card.card_uuid";
pub const CARD_HIGHLIGHT_FIELDS: &str = "card.text_by_propertypath.*";

const VALUE_SUBAGG_SIZE: usize = 10;

pub fn path_field(base_field: &str, bucket: &str, path: &Propertypath) -> String {
    format!("{base_field}.{bucket}.{}", path.field_name())
}

fn depth_field(base_field: &str, bucket: &str, depth: usize) -> String {
    format!("{base_field}.{bucket}.{}", depth_field_name(depth))
}

/// Filters and text for one base field.
pub struct QueryHelper<'a> {
    pub base_field: &'static str,
    pub textsegment_set: &'a BTreeSet<Textsegment>,
    pub filter_set: &'a [SearchFilter],
    /// Add `should` phrase clauses to rank closer matches higher.
    pub relevance_matters: bool,
}

impl QueryHelper<'_> {
    pub fn add_boolparts(&self, bool_query: &mut BoolQuery) {
        self.add_filter_boolparts(bool_query);
        self.add_text_boolparts(bool_query);
    }

    fn add_filter_boolparts(&self, bool_query: &mut BoolQuery) {
        for filter in self.filter_set {
            match filter.operator {
                FilterOperator::IsPresent => bool_query.filter.push(self.presence_query(filter)),
                FilterOperator::IsAbsent => bool_query.must_not.push(self.presence_query(filter)),
                // an empty value set constrains nothing
                _ if filter.value_set.is_empty() => {}
                FilterOperator::AnyOf => bool_query.filter.push(self.iri_filter(filter)),
                FilterOperator::NoneOf => bool_query.must_not.push(self.iri_filter(filter)),
                FilterOperator::Before | FilterOperator::After | FilterOperator::AtDate => {
                    if let Some(query) = self.date_filter(filter) {
                        bool_query.filter.push(query);
                    }
                }
            }
        }
    }

    fn add_text_boolparts(&self, bool_query: &mut BoolQuery) {
        for segment in self.textsegment_set {
            if segment.is_negated {
                bool_query.must_not.push(self.exact_text_query(segment));
            } else if !segment.is_fuzzy {
                bool_query.must.push(self.exact_text_query(segment));
            } else {
                bool_query.must.push(self.fuzzy_text_must_query(segment));
                if self.relevance_matters {
                    bool_query.should.push(self.fuzzy_text_should_query(segment));
                }
            }
        }
    }

    fn presence_query(&self, filter: &SearchFilter) -> Query {
        Query::any_of(
            filter
                .propertypath_set
                .iter()
                .map(|path| self.path_presence_query(path))
                .collect(),
        )
    }

    /// Glob paths match through the per-depth glob keyword the sourcedoc
    /// adds alongside each concrete path.
    fn path_presence_query(&self, path: &Propertypath) -> Query {
        Query::term(
            format!("{}.propertypaths_present", self.base_field),
            path.keyword(),
        )
    }

    fn iri_filter(&self, filter: &SearchFilter) -> Query {
        let suffuniq_iris: Vec<String> = filter
            .value_set
            .iter()
            .map(|iri| sufficiently_unique_iri(iri).unwrap_or_else(|_| iri.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Query::any_of(
            filter
                .propertypath_set
                .iter()
                .map(|path| Query::terms(self.iri_field(path), suffuniq_iris.clone()))
                .collect(),
        )
    }

    fn iri_field(&self, path: &Propertypath) -> String {
        if path.steps() == [vocab::OWL_SAMEAS.to_string()] {
            format!("{}.focus_iri.suffuniq", self.base_field)
        } else if path.is_glob() {
            depth_field(self.base_field, "iri_by_depth", path.len())
        } else {
            path_field(self.base_field, "iri_by_propertypath", path)
        }
    }

    fn date_filter(&self, filter: &SearchFilter) -> Option<Query> {
        let queries: Vec<Query> = filter
            .propertypath_set
            .iter()
            .filter_map(|path| self.date_filter_for_path(path, filter))
            .collect();
        (!queries.is_empty()).then(|| Query::any_of(queries))
    }

    fn date_filter_for_path(&self, path: &Propertypath, filter: &SearchFilter) -> Option<Query> {
        let field = path_field(self.base_field, "date_by_propertypath", path);
        let range = |gt: Option<String>,
                     gte: Option<String>,
                     lt: Option<String>,
                     lte: Option<String>| Query::Range {
            field: field.clone(),
            gt,
            gte,
            lt,
            lte,
        };
        // iso dates compare as strings
        match filter.operator {
            FilterOperator::Before => {
                let bound = daterange_value(filter.value_set.first()?)?;
                Some(range(None, None, Some(bound), None))
            }
            FilterOperator::After => {
                let bound = daterange_value(filter.value_set.last()?)?;
                Some(range(Some(bound), None, None, None))
            }
            FilterOperator::AtDate => {
                let queries: Vec<Query> = filter
                    .value_set
                    .iter()
                    .filter_map(|v| daterange_value(v))
                    .map(|bound| range(None, Some(bound.clone()), None, Some(bound)))
                    .collect();
                (!queries.is_empty()).then(|| Query::any_of(queries))
            }
            _ => None,
        }
    }

    fn text_field(&self, path: &Propertypath) -> String {
        if path.is_glob() {
            depth_field(self.base_field, "text_by_depth", path.len())
        } else {
            path_field(self.base_field, "text_by_propertypath", path)
        }
    }

    fn per_path(&self, segment: &Textsegment, build: impl Fn(String) -> Query) -> Query {
        Query::any_of(
            segment
                .propertypath_set
                .iter()
                .map(|path| build(self.text_field(path)))
                .collect(),
        )
    }

    fn exact_text_query(&self, segment: &Textsegment) -> Query {
        self.per_path(segment, |field| {
            if segment.is_openended && !segment.is_negated {
                Query::MatchPhrasePrefix {
                    field,
                    query: segment.text.clone(),
                }
            } else {
                Query::MatchPhrase {
                    field,
                    query: segment.text.clone(),
                    slop: 0,
                }
            }
        })
    }

    fn fuzzy_text_must_query(&self, segment: &Textsegment) -> Query {
        self.per_path(segment, |field| Query::Match {
            field,
            query: segment.text.clone(),
            fuzzy: true,
        })
    }

    fn fuzzy_text_should_query(&self, segment: &Textsegment) -> Query {
        let slop = segment.words().len() as u32;
        self.per_path(segment, |field| Query::MatchPhrase {
            field,
            query: segment.text.clone(),
            slop,
        })
    }
}

fn exclude_iri_value_docs(bool_query: &mut BoolQuery) {
    bool_query.must_not.push(Query::exists("iri_value"));
}

fn randomly_ordered_query(mut bool_query: BoolQuery, cursor: &CardsearchCursor) -> Query {
    if cursor.first_page_ids.is_empty() {
        // independent random sample
        return Query::FunctionScore {
            query: Box::new(Query::Bool(bool_query)),
            random_score: RandomScore::default(),
        };
    }
    let first_page = Query::terms(CARD_UUID_FIELD, cursor.first_page_ids.iter().cloned());
    if cursor.is_first_page() {
        bool_query.filter.push(first_page);
        return Query::Bool(bool_query);
    }
    bool_query.must_not.push(first_page);
    Query::FunctionScore {
        query: Box::new(Query::Bool(bool_query)),
        random_score: RandomScore {
            seed: Some(cursor.first_page_ids.concat()),
            field: Some(CARD_UUID_FIELD.to_string()),
        },
    }
}

pub fn build_cardsearch_request(
    params: &CardsearchParams,
    cursor: &CardsearchCursor,
) -> SearchRequest {
    let mut bool_query = BoolQuery::default();
    QueryHelper {
        base_field: "card",
        textsegment_set: &params.cardsearch_textsegment_set,
        filter_set: &params.cardsearch_filter_set,
        relevance_matters: params.sort_list.is_empty(),
    }
    .add_boolparts(&mut bool_query);
    exclude_iri_value_docs(&mut bool_query);
    let query = if cursor.random_sort {
        randomly_ordered_query(bool_query, cursor)
    } else {
        Query::Bool(bool_query)
    };

    let mut request = SearchRequest {
        query,
        from: cursor.cardsearch_start_index().max(0) as usize,
        size: cursor.page_size().max(0) as usize,
        sort: params
            .sort_list
            .iter()
            .map(|sort| SortField {
                field: path_field("card", "date_by_propertypath", &sort.propertypath),
                descending: sort.descending,
            })
            .collect(),
        docvalue_fields: vec![CARD_IRI_FIELD.to_string()],
        highlight_fields: vec![CARD_HIGHLIGHT_FIELDS.to_string()],
        source: false,
        ..Default::default()
    };
    if !params.related_propertypath_set.is_empty() {
        request.aggs.insert(
            AGG_RELATED_PROPERTYPATH_USAGE.to_string(),
            Aggregation::Terms {
                field: "card.propertypaths_present".to_string(),
                include: Some(
                    params
                        .related_propertypath_set
                        .iter()
                        .map(Propertypath::keyword)
                        .collect(),
                ),
                size: params.related_propertypath_set.len(),
                aggs: Default::default(),
            },
        );
    }
    request
}

/// Aggregates value IRIs; hits are not needed.
///
/// Buckets are requested through the end of the page plus one, so the
/// response can tell whether more pages follow.
pub fn build_iri_valuesearch_request(
    params: &ValuesearchParams,
    cursor: &SimpleCursor,
) -> SearchRequest {
    let mut bool_query = BoolQuery::default();
    bool_query.filter.push(Query::term(
        "iri_value.at_card_propertypaths",
        params.valuesearch_propertypath.keyword(),
    ));
    QueryHelper {
        base_field: "card",
        textsegment_set: &params.cardsearch.cardsearch_textsegment_set,
        filter_set: &params.cardsearch.cardsearch_filter_set,
        relevance_matters: false,
    }
    .add_boolparts(&mut bool_query);
    QueryHelper {
        base_field: "iri_value",
        textsegment_set: &params.valuesearch_textsegment_set,
        filter_set: &params.valuesearch_filter_set,
        relevance_matters: false,
    }
    .add_boolparts(&mut bool_query);

    let size = cursor
        .start_index
        .saturating_add(cursor.page_size)
        .saturating_add(1)
        .max(1) as usize;
    let iri_agg = Aggregation::Terms {
        field: "iri_value.value_iri".to_string(),
        include: None,
        size,
        aggs: [
            (AGG_TYPE_IRI, "iri_value.value_type"),
            (AGG_VALUE_NAME, "iri_value.value_name"),
            (AGG_VALUE_TITLE, "iri_value.value_title"),
            (AGG_VALUE_LABEL, "iri_value.value_label"),
        ]
        .into_iter()
        .map(|(name, field)| (name.to_string(), Aggregation::terms(field, VALUE_SUBAGG_SIZE)))
        .collect(),
    };
    let mut request = SearchRequest {
        query: Query::Bool(bool_query),
        size: 0,
        ..Default::default()
    };
    request.aggs.insert(AGG_VALUESEARCH_IRIS.to_string(), iri_agg);
    request
}

/// Year histogram of a date path across matching cards, newest first.
pub fn build_date_valuesearch_request(params: &ValuesearchParams) -> SearchRequest {
    let mut bool_query = BoolQuery::default();
    QueryHelper {
        base_field: "card",
        textsegment_set: &params.cardsearch.cardsearch_textsegment_set,
        filter_set: &params.cardsearch.cardsearch_filter_set,
        relevance_matters: false,
    }
    .add_boolparts(&mut bool_query);
    exclude_iri_value_docs(&mut bool_query);
    let mut request = SearchRequest {
        query: Query::Bool(bool_query),
        size: 0,
        ..Default::default()
    };
    request.aggs.insert(
        AGG_VALUESEARCH_DATES.to_string(),
        Aggregation::YearHistogram {
            field: path_field("card", "date_by_propertypath", &params.valuesearch_propertypath),
            descending: true,
            min_doc_count: 1,
        },
    );
    request
}

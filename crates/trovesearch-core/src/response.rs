//! Search responses, serializable as the HTTP body.

use serde::{Serialize, Serializer};

use crate::propertypath::Propertypath;

/// Exact count, or "more than the engine counted".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TotalCount {
    Exact(u64),
    ManyMore,
}

impl Serialize for TotalCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TotalCount::Exact(n) => serializer.serialize_u64(*n),
            TotalCount::ManyMore => serializer.serialize_str("trove:ten-thousands-and-more"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMatchEvidence {
    pub property_path: Propertypath,
    pub matching_highlight: String,
    pub card_iri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardsearchResult {
    pub card_iri: String,
    pub card_uuid: String,
    pub text_match_evidence: Vec<TextMatchEvidence>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertypathUsage {
    pub property_path: Propertypath,
    pub usage_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardsearchResponse {
    pub total_result_count: TotalCount,
    pub search_result_page: Vec<CardsearchResult>,
    pub related_propertypath_results: Vec<PropertypathUsage>,
    pub next_page_cursor: Option<String>,
    pub prev_page_cursor: Option<String>,
    pub first_page_cursor: Option<String>,
}

impl CardsearchResponse {
    pub fn card_uuids(&self) -> Vec<&str> {
        self.search_result_page
            .iter()
            .map(|r| r.card_uuid.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ValuesearchResult {
    pub value_iri: Option<String>,
    pub value_value: Option<String>,
    pub value_type: Vec<String>,
    pub name_text: Vec<String>,
    pub title_text: Vec<String>,
    pub label_text: Vec<String>,
    pub match_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ValuesearchResponse {
    pub search_result_page: Vec<ValuesearchResult>,
    pub next_page_cursor: Option<String>,
    pub prev_page_cursor: Option<String>,
    pub first_page_cursor: Option<String>,
}

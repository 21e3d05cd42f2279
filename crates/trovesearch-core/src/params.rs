//! Search parameters parsed from a querystring.
//!
//! Queryparam names follow `family[bracket][bracket]`; values are often
//! comma-separated lists. Families understood here:
//!
//! | Family | Shape |
//! |--------|-------|
//! | `cardSearchText` | `cardSearchText[<pathset>]=<text>` |
//! | `cardSearchFilter` | `cardSearchFilter[<pathset>][<operator>]=<values>` |
//! | `valueSearchPropertyPath` | `valueSearchPropertyPath=<path>` |
//! | `valueSearchText` / `valueSearchFilter` | as their cardsearch counterparts |
//! | `sort` | `sort=-dateCreated` (`-relevance` for none) |
//! | `page` | `page[size]=<n>` or `page[cursor]=<opaque>` |
//! | `indexStrategy` | strategy name or specific index name |
//!
//! [`ValuesearchParams`] composes [`CardsearchParams`]: a valuesearch is
//! always in the context of a cardsearch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParamError;
use crate::propertypath::{parse_propertypath, parse_propertypath_set, Propertypath, PropertypathSet};
use crate::vocab;

pub const QUERYPARAM_VALUES_DELIM: char = ',';
pub const NEGATE_WORD_OR_PHRASE: char = '-';
pub const DOUBLE_QUOTATION_MARK: char = '"';
pub const DESCENDING_SORT_PREFIX: char = '-';

pub const DEFAULT_PAGE_SIZE: usize = 13;
pub const MAX_PAGE_SIZE: usize = 101;

static QUERYPARAM_FAMILY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][-_a-zA-Z0-9]*").unwrap());
static QUERYPARAM_BRACKET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\[([^\[\]]*)\]").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryparamName {
    pub family: String,
    pub bracketed_names: Vec<String>,
}

impl QueryparamName {
    pub fn new(family: &str, bracketed_names: &[&str]) -> Self {
        Self {
            family: family.to_string(),
            bracketed_names: bracketed_names.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn parse(name: &str) -> Result<Self, ParamError> {
        let invalid = || ParamError::InvalidQueryparamName(name.to_string());
        let family = QUERYPARAM_FAMILY_RE.find(name).ok_or_else(invalid)?;
        let mut rest = &name[family.end()..];
        let mut bracketed_names = Vec::new();
        while !rest.is_empty() {
            let caps = QUERYPARAM_BRACKET_RE.captures(rest).ok_or_else(invalid)?;
            let whole = caps.get(0).ok_or_else(invalid)?;
            bracketed_names.push(caps.get(1).map(|m| m.as_str()).unwrap_or("").to_string());
            rest = &rest[whole.end()..];
        }
        Ok(Self {
            family: family.as_str().to_string(),
            bracketed_names,
        })
    }
}

impl fmt::Display for QueryparamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.family)?;
        for name in &self.bracketed_names {
            write!(f, "[{name}]")?;
        }
        Ok(())
    }
}

/// Params grouped by family, in querystring order.
#[derive(Debug, Clone, Default)]
pub struct QueryparamDict {
    by_family: BTreeMap<String, Vec<(QueryparamName, String)>>,
    raw: Vec<(String, String)>,
}

impl QueryparamDict {
    pub fn from_querystring(querystring: &str) -> Result<Self, ParamError> {
        let qs = querystring.trim_start_matches('?');
        let mut dict = Self::default();
        for (name, value) in url::form_urlencoded::parse(qs.as_bytes()) {
            let parsed = QueryparamName::parse(&name)?;
            dict.by_family
                .entry(parsed.family.clone())
                .or_default()
                .push((parsed, value.to_string()));
            dict.raw.push((name.into_owned(), value.into_owned()));
        }
        Ok(dict)
    }

    pub fn family(&self, family: &str) -> &[(QueryparamName, String)] {
        self.by_family.get(family).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The one value for an exact name; repeating it is an error.
    pub fn single_value(&self, name: &QueryparamName) -> Result<Option<String>, ParamError> {
        let values: Vec<&String> = self
            .family(&name.family)
            .iter()
            .filter(|(n, _)| n.bracketed_names == name.bracketed_names)
            .map(|(_, v)| v)
            .collect();
        match values.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some((*one).clone())),
            many => Err(ParamError::RepeatedSingleValue {
                param: name.to_string(),
                count: many.len(),
            }),
        }
    }

    /// Rebuild a querystring, dropping `page[...]` and adding `page[cursor]`.
    pub fn querystring_with_cursor(&self, cursor: &str) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.raw {
            if name == "page" || name.starts_with("page[") {
                continue;
            }
            ser.append_pair(name, value);
        }
        ser.append_pair("page[cursor]", cursor);
        ser.finish()
    }
}

pub fn split_queryparam_value(value: &str) -> impl Iterator<Item = &str> {
    value.split(QUERYPARAM_VALUES_DELIM)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOperator {
    AnyOf,
    NoneOf,
    IsPresent,
    IsAbsent,
    Before,
    After,
    AtDate,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 7] = [
        FilterOperator::AnyOf,
        FilterOperator::NoneOf,
        FilterOperator::IsPresent,
        FilterOperator::IsAbsent,
        FilterOperator::Before,
        FilterOperator::After,
        FilterOperator::AtDate,
    ];

    pub fn shortname(&self) -> &'static str {
        match self {
            FilterOperator::AnyOf => "any-of",
            FilterOperator::NoneOf => "none-of",
            FilterOperator::IsPresent => "is-present",
            FilterOperator::IsAbsent => "is-absent",
            FilterOperator::Before => "before",
            FilterOperator::After => "after",
            FilterOperator::AtDate => "at-date",
        }
    }

    pub fn from_shortname(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.shortname() == name)
    }

    pub fn is_date_operator(&self) -> bool {
        matches!(
            self,
            FilterOperator::Before | FilterOperator::After | FilterOperator::AtDate
        )
    }

    pub fn is_iri_operator(&self) -> bool {
        matches!(self, FilterOperator::AnyOf | FilterOperator::NoneOf)
    }

    pub fn is_valueless_operator(&self) -> bool {
        matches!(self, FilterOperator::IsPresent | FilterOperator::IsAbsent)
    }
}

/// Elasticsearch date math for a partial ISO date: year, month, or day.
///
/// The date must exist on the calendar; `2020-02-31` and `2020-13` are
/// rejected here rather than by the engine.
pub fn daterange_value(value: &str) -> Option<String> {
    static PARTIAL_DATE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(\d{4,})(?:-(\d{2})(?:-(\d{2}))?)?$").unwrap());
    let clean = value.trim();
    let caps = PARTIAL_DATE.captures(clean)?;
    let year: i32 = caps[1].parse().ok()?;
    let month = caps.get(2).map(|m| m.as_str().parse::<u32>()).transpose().ok()?;
    let day = caps.get(3).map(|d| d.as_str().parse::<u32>()).transpose().ok()?;
    NaiveDate::from_ymd_opt(year, month.unwrap_or(1), day.unwrap_or(1))?;
    let rounding = match (month, day) {
        (None, _) => "y",
        (Some(_), None) => "M",
        (Some(_), Some(_)) => "d",
    };
    Some(format!("{clean}||/{rounding}"))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchFilter {
    pub operator: FilterOperator,
    pub propertypath_set: PropertypathSet,
    pub value_set: BTreeSet<String>,
    pub original_param_name: String,
    pub original_param_value: String,
}

impl SearchFilter {
    pub fn for_queryparam_family(
        queryparams: &QueryparamDict,
        family: &str,
    ) -> Result<Vec<Self>, ParamError> {
        queryparams
            .family(family)
            .iter()
            .map(|(name, value)| Self::from_filter_param(name, value))
            .collect()
    }

    pub fn from_filter_param(name: &QueryparamName, value: &str) -> Result<Self, ParamError> {
        let param = name.to_string();
        let (serialized_paths, operator_name) = match name.bracketed_names.as_slice() {
            [paths] => (paths.as_str(), None),
            [paths, op] => (paths.as_str(), Some(op.as_str()).filter(|op| !op.is_empty())),
            _ => return Err(ParamError::InvalidQueryparamName(param)),
        };
        let propertypath_set = parse_propertypath_set(&param, serialized_paths)?;
        let all_dates = propertypath_set.iter().all(Propertypath::ends_with_date_property);
        let operator = match operator_name {
            None if all_dates => FilterOperator::AtDate,
            None => FilterOperator::AnyOf,
            Some(op) => FilterOperator::from_shortname(op).ok_or_else(|| {
                ParamError::UnknownOperator {
                    param: param.clone(),
                    operator: op.to_string(),
                }
            })?,
        };
        if operator.is_date_operator() && !all_dates {
            return Err(ParamError::DateOperatorOnNonDatePath {
                param,
                operator: operator.shortname().to_string(),
            });
        }
        let mut value_set = BTreeSet::new();
        if !operator.is_valueless_operator() {
            for v in split_queryparam_value(value).map(str::trim).filter(|v| !v.is_empty()) {
                if operator.is_date_operator() {
                    if daterange_value(v).is_none() {
                        return Err(ParamError::InvalidDate {
                            param,
                            value: v.to_string(),
                        });
                    }
                    value_set.insert(v.to_string());
                } else {
                    value_set.insert(vocab::expand_shorthand(v).unwrap_or_else(|| v.to_string()));
                }
            }
        }
        Ok(Self {
            operator,
            propertypath_set,
            value_set,
            original_param_name: param,
            original_param_value: value.to_string(),
        })
    }

    fn is_single_path_anyof(&self, predicate: &str) -> bool {
        self.operator == FilterOperator::AnyOf
            && self.propertypath_set.len() == 1
            && self
                .propertypath_set
                .iter()
                .all(|p| p.steps() == [predicate.to_string()])
    }

    pub fn is_sameas_filter(&self) -> bool {
        self.is_single_path_anyof(&vocab::OWL_SAMEAS)
    }

    pub fn is_type_filter(&self) -> bool {
        self.is_single_path_anyof(&vocab::RDF_TYPE)
    }
}

/// A word or phrase from search text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Textsegment {
    pub text: String,
    pub is_fuzzy: bool,
    pub is_negated: bool,
    pub is_openended: bool,
    pub propertypath_set: PropertypathSet,
}

impl Textsegment {
    pub fn words(&self) -> Vec<&str> {
        self.text.split_whitespace().collect()
    }

    /// Split search text into quoted phrases and fuzzy word groups.
    ///
    /// A quoted phrase is exact; a `-` just before the opening quote negates
    /// it. Unquoted consecutive non-negated words join into one fuzzy
    /// segment, and each `-word` becomes its own negated exact segment. The
    /// final segment is open-ended when nothing (not even a closing quote)
    /// follows it.
    pub fn split_str(text: &str, propertypath_set: &PropertypathSet) -> Vec<Textsegment> {
        let mut segments = Vec::new();
        let mut in_quotes = false;
        let mut last_quote_prefix: Option<char> = None;
        let mut remaining = text;
        while !remaining.is_empty() {
            let (chunk, quote_found, rest) = match remaining.find(DOUBLE_QUOTATION_MARK) {
                Some(at) => (&remaining[..at], true, &remaining[at + 1..]),
                None => (remaining, false, ""),
            };
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                let is_openended = !(quote_found || !rest.is_empty());
                if in_quotes {
                    segments.push(Textsegment {
                        text: chunk.to_string(),
                        is_fuzzy: false,
                        is_negated: last_quote_prefix == Some(NEGATE_WORD_OR_PHRASE),
                        is_openended,
                        propertypath_set: propertypath_set.clone(),
                    });
                } else {
                    segments.extend(Self::from_fuzzy_text(chunk, is_openended, propertypath_set));
                }
            }
            if quote_found {
                if in_quotes {
                    in_quotes = false;
                    last_quote_prefix = None;
                } else {
                    in_quotes = true;
                    last_quote_prefix = chunk.chars().last();
                }
            }
            remaining = rest;
        }
        segments
    }

    fn from_fuzzy_text(
        chunk: &str,
        is_openended: bool,
        propertypath_set: &PropertypathSet,
    ) -> Vec<Textsegment> {
        if chunk == "*" {
            return Vec::new();
        }
        let mut groups: Vec<(bool, Vec<&str>)> = Vec::new();
        for word in chunk.split_whitespace() {
            let negated = word.starts_with(NEGATE_WORD_OR_PHRASE);
            match groups.last_mut() {
                Some((group_negated, words)) if *group_negated == negated => words.push(word),
                _ => groups.push((negated, vec![word])),
            }
        }
        let last_index = groups.len().saturating_sub(1);
        let mut segments = Vec::new();
        for (i, (negated, words)) in groups.into_iter().enumerate() {
            if negated {
                for word in words {
                    let bare = &word[NEGATE_WORD_OR_PHRASE.len_utf8()..];
                    if !bare.is_empty() {
                        segments.push(Textsegment {
                            text: bare.to_string(),
                            is_fuzzy: false,
                            is_negated: true,
                            is_openended: false,
                            propertypath_set: propertypath_set.clone(),
                        });
                    }
                }
            } else {
                segments.push(Textsegment {
                    text: words.join(" "),
                    is_fuzzy: true,
                    is_negated: false,
                    is_openended: is_openended && i == last_index,
                    propertypath_set: propertypath_set.clone(),
                });
            }
        }
        segments
    }
}

pub fn default_text_pathset() -> PropertypathSet {
    BTreeSet::from([Propertypath::glob(1)])
}

/// All text for a family, joined, plus its segments (each scoped to the param's path set).
pub fn text_queryparam(
    queryparams: &QueryparamDict,
    family: &str,
) -> Result<(String, BTreeSet<Textsegment>), ParamError> {
    let mut texts = Vec::new();
    let mut segments = BTreeSet::new();
    for (name, value) in queryparams.family(family) {
        let param = name.to_string();
        let pathset = match name.bracketed_names.first().filter(|b| !b.is_empty()) {
            None => default_text_pathset(),
            Some(serialized) => parse_propertypath_set(&param, serialized)?,
        };
        if let Some(long_glob) = pathset.iter().find(|p| p.is_glob() && p.len() > 1) {
            return Err(ParamError::GlobTooLong {
                param,
                path: long_glob.to_string(),
            });
        }
        texts.push(value.clone());
        segments.extend(Textsegment::split_str(value, &pathset));
    }
    Ok((texts.join(" "), segments))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortParam {
    pub propertypath: Propertypath,
    pub descending: bool,
}

impl SortParam {
    pub fn from_queryparams(queryparams: &QueryparamDict) -> Result<Vec<Self>, ParamError> {
        let name = QueryparamName::new("sort", &[]);
        let Some(value) = queryparams.single_value(&name)? else {
            return Ok(Vec::new());
        };
        if value.is_empty() || value == "-relevance" {
            return Ok(Vec::new());
        }
        split_queryparam_value(&value)
            .map(|sort| {
                let descending = sort.starts_with(DESCENDING_SORT_PREFIX);
                let path_text = sort.trim_start_matches(DESCENDING_SORT_PREFIX);
                let propertypath = parse_propertypath("sort", path_text)?;
                if !propertypath.ends_with_date_property() || propertypath.is_glob() {
                    return Err(ParamError::InvalidSort {
                        param: "sort".into(),
                        path: path_text.to_string(),
                    });
                }
                Ok(Self {
                    propertypath,
                    descending,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageParam {
    /// Opaque; interpreted by the index strategy.
    pub cursor: Option<String>,
    pub size: usize,
}

impl PageParam {
    pub fn from_queryparams(queryparams: &QueryparamDict) -> Result<Self, ParamError> {
        let cursor = queryparams
            .single_value(&QueryparamName::new("page", &["cursor"]))?
            .filter(|c| !c.is_empty());
        let size_name = QueryparamName::new("page", &["size"]);
        let size = match queryparams.single_value(&size_name)? {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n.min(MAX_PAGE_SIZE),
                _ => {
                    return Err(ParamError::InvalidPageSize {
                        param: size_name.to_string(),
                        value: raw,
                    })
                }
            },
        };
        Ok(Self { cursor, size })
    }
}

#[derive(Debug, Clone)]
pub struct CardsearchParams {
    pub cardsearch_text: String,
    pub cardsearch_textsegment_set: BTreeSet<Textsegment>,
    pub cardsearch_filter_set: Vec<SearchFilter>,
    pub index_strategy_name: Option<String>,
    pub sort_list: Vec<SortParam>,
    pub page: PageParam,
    pub related_propertypath_set: Vec<Propertypath>,
    pub queryparams: QueryparamDict,
}

impl CardsearchParams {
    pub fn from_querystring(querystring: &str) -> Result<Self, ParamError> {
        Self::from_queryparams(QueryparamDict::from_querystring(querystring)?)
    }

    pub fn from_queryparams(queryparams: QueryparamDict) -> Result<Self, ParamError> {
        let (cardsearch_text, cardsearch_textsegment_set) =
            text_queryparam(&queryparams, "cardSearchText")?;
        let cardsearch_filter_set =
            SearchFilter::for_queryparam_family(&queryparams, "cardSearchFilter")?;
        Ok(Self {
            cardsearch_text,
            cardsearch_textsegment_set,
            related_propertypath_set: related_propertypaths(&cardsearch_filter_set),
            cardsearch_filter_set,
            index_strategy_name: queryparams
                .single_value(&QueryparamName::new("indexStrategy", &[]))?,
            sort_list: SortParam::from_queryparams(&queryparams)?,
            page: PageParam::from_queryparams(&queryparams)?,
            queryparams,
        })
    }

    /// No sort and no text: nothing to rank by, so results come in random order.
    pub fn wants_random_sort(&self) -> bool {
        self.sort_list.is_empty() && self.cardsearch_textsegment_set.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ValuesearchParams {
    pub cardsearch: CardsearchParams,
    pub valuesearch_propertypath: Propertypath,
    pub valuesearch_text: String,
    pub valuesearch_textsegment_set: BTreeSet<Textsegment>,
    pub valuesearch_filter_set: Vec<SearchFilter>,
}

impl ValuesearchParams {
    pub fn from_querystring(querystring: &str) -> Result<Self, ParamError> {
        Self::from_queryparams(QueryparamDict::from_querystring(querystring)?)
    }

    pub fn from_queryparams(queryparams: QueryparamDict) -> Result<Self, ParamError> {
        let path_name = QueryparamName::new("valueSearchPropertyPath", &[]);
        let raw_path = queryparams
            .single_value(&path_name)?
            .filter(|p| !p.is_empty())
            .ok_or(ParamError::MissingValuesearchPropertypath)?;
        let valuesearch_propertypath = parse_propertypath(&path_name.to_string(), &raw_path)?;
        let (valuesearch_text, valuesearch_textsegment_set) =
            text_queryparam(&queryparams, "valueSearchText")?;
        let valuesearch_filter_set =
            SearchFilter::for_queryparam_family(&queryparams, "valueSearchFilter")?;
        if valuesearch_propertypath.ends_with_date_property() {
            if !valuesearch_textsegment_set.is_empty() {
                return Err(ParamError::UnsupportedDateValuesearch {
                    param: "valueSearchText".into(),
                });
            }
            if !valuesearch_filter_set.is_empty() {
                return Err(ParamError::UnsupportedDateValuesearch {
                    param: "valueSearchFilter".into(),
                });
            }
        }
        Ok(Self {
            cardsearch: CardsearchParams::from_queryparams(queryparams)?,
            valuesearch_propertypath,
            valuesearch_text,
            valuesearch_textsegment_set,
            valuesearch_filter_set,
        })
    }

    pub fn is_date_valuesearch(&self) -> bool {
        self.valuesearch_propertypath.ends_with_date_property()
    }
}

/// Suggested related paths for the types named by type filters.
fn related_propertypaths(filter_set: &[SearchFilter]) -> Vec<Propertypath> {
    let mut type_iris = BTreeSet::new();
    let rdf_type = Propertypath::new([vocab::RDF_TYPE.as_str()]);
    for filter in filter_set {
        if filter.propertypath_set.len() != 1 || !filter.propertypath_set.contains(&rdf_type) {
            continue;
        }
        match filter.operator {
            FilterOperator::AnyOf => type_iris.extend(filter.value_set.iter().cloned()),
            FilterOperator::NoneOf => {
                for iri in &filter.value_set {
                    type_iris.remove(iri);
                }
            }
            _ => {}
        }
    }
    let mut paths: Vec<Propertypath> = Vec::new();
    for type_iri in &type_iris {
        for steps in vocab::suggested_propertypaths(type_iri) {
            let expanded: Option<Vec<String>> =
                steps.iter().map(|s| vocab::expand_shorthand(s)).collect();
            if let Some(expanded) = expanded {
                let path = Propertypath::new(expanded);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::{dcterms, foaf, osfmap};

    fn seg(text: &str, fuzzy: bool, negated: bool, openended: bool) -> Textsegment {
        Textsegment {
            text: text.into(),
            is_fuzzy: fuzzy,
            is_negated: negated,
            is_openended: openended,
            propertypath_set: default_text_pathset(),
        }
    }

    fn split(text: &str) -> Vec<Textsegment> {
        Textsegment::split_str(text, &default_text_pathset())
    }

    #[test]
    fn test_queryparam_name_parse() {
        let name = QueryparamName::parse("cardSearchFilter[creator.name][any-of]").unwrap();
        assert_eq!(name.family, "cardSearchFilter");
        assert_eq!(name.bracketed_names, vec!["creator.name", "any-of"]);
        assert_eq!(name.to_string(), "cardSearchFilter[creator.name][any-of]");
        assert_eq!(QueryparamName::parse("sort").unwrap().bracketed_names.len(), 0);
        assert!(QueryparamName::parse("[x]").is_err());
        assert!(QueryparamName::parse("a[b").is_err());
        assert!(QueryparamName::parse("a[b]c").is_err());
    }

    #[test]
    fn test_textsegments() {
        assert_eq!(split("word"), vec![seg("word", true, false, true)]);
        assert_eq!(split("two words"), vec![seg("two words", true, false, true)]);
        assert_eq!(
            split("hello -no world"),
            vec![
                seg("hello", true, false, false),
                seg("no", false, true, false),
                seg("world", true, false, true),
            ]
        );
        assert_eq!(
            split(r#"a "quoted phrase" b"#),
            vec![
                seg("a", true, false, false),
                seg("quoted phrase", false, false, false),
                seg("b", true, false, true),
            ]
        );
        assert_eq!(
            split(r#"-"not this" ok"#),
            vec![seg("not this", false, true, false), seg("ok", true, false, true)]
        );
        assert_eq!(split(r#"open "ended"#), vec![
            seg("open", true, false, false),
            seg("ended", false, false, true),
        ]);
        assert!(split("*").is_empty());
        assert!(split("   ").is_empty());
    }

    #[test]
    fn test_filter_default_operators() {
        let params = CardsearchParams::from_querystring(
            "cardSearchFilter[dateCreated]=2020&cardSearchFilter[resourceType]=Preprint,Project",
        )
        .unwrap();
        let date = &params.cardsearch_filter_set[0];
        assert_eq!(date.operator, FilterOperator::AtDate);
        assert_eq!(date.value_set, BTreeSet::from(["2020".to_string()]));
        let types = &params.cardsearch_filter_set[1];
        assert_eq!(types.operator, FilterOperator::AnyOf);
        assert!(types.is_type_filter());
        assert_eq!(
            types.value_set,
            BTreeSet::from([osfmap("Preprint"), osfmap("Project")])
        );
        assert!(params
            .related_propertypath_set
            .contains(&Propertypath::new([dcterms("created")])));
    }

    #[test]
    fn test_filter_errors() {
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[title][before]=2020"),
            Err(ParamError::DateOperatorOnNonDatePath { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[title][bogus]=x"),
            Err(ParamError::UnknownOperator { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[nope]=x"),
            Err(ParamError::InvalidPropertypath { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter=x"),
            Err(ParamError::InvalidQueryparamName(_))
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[dateCreated]=yesterday"),
            Err(ParamError::InvalidDate { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[dateCreated][after]=2020-02-31"),
            Err(ParamError::InvalidDate { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchFilter[dateCreated]=2020-13"),
            Err(ParamError::InvalidDate { .. })
        ));
    }

    #[test]
    fn test_valueless_operator_ignores_values() {
        let params =
            CardsearchParams::from_querystring("cardSearchFilter[rights][is-present]=whatever")
                .unwrap();
        assert_eq!(params.cardsearch_filter_set[0].operator, FilterOperator::IsPresent);
        assert!(params.cardsearch_filter_set[0].value_set.is_empty());
    }

    #[test]
    fn test_repeated_single_value() {
        assert!(matches!(
            CardsearchParams::from_querystring("sort=dateCreated&sort=-dateModified"),
            Err(ParamError::RepeatedSingleValue { count: 2, .. })
        ));
    }

    #[test]
    fn test_sort_and_page() {
        let params =
            CardsearchParams::from_querystring("sort=-dateCreated&page[size]=500").unwrap();
        assert_eq!(
            params.sort_list,
            vec![SortParam {
                propertypath: Propertypath::new([dcterms("created")]),
                descending: true,
            }]
        );
        assert_eq!(params.page.size, MAX_PAGE_SIZE);
        assert!(!params.wants_random_sort());

        let relevance = CardsearchParams::from_querystring("sort=-relevance").unwrap();
        assert!(relevance.sort_list.is_empty());
        assert!(relevance.wants_random_sort());
        assert_eq!(relevance.page.size, DEFAULT_PAGE_SIZE);

        assert!(matches!(
            CardsearchParams::from_querystring("sort=title"),
            Err(ParamError::InvalidSort { .. })
        ));
        assert!(matches!(
            CardsearchParams::from_querystring("page[size]=zero"),
            Err(ParamError::InvalidPageSize { .. })
        ));
    }

    #[test]
    fn test_text_pathsets() {
        let params = CardsearchParams::from_querystring(
            "cardSearchText[creator.name]=pat&cardSearchText=hello",
        )
        .unwrap();
        assert_eq!(params.cardsearch_text, "pat hello");
        let scoped = params
            .cardsearch_textsegment_set
            .iter()
            .find(|s| s.text == "pat")
            .unwrap();
        assert_eq!(
            scoped.propertypath_set,
            BTreeSet::from([Propertypath::new([dcterms("creator"), foaf("name")])])
        );
        assert!(matches!(
            CardsearchParams::from_querystring("cardSearchText[*.*]=x"),
            Err(ParamError::GlobTooLong { .. })
        ));
    }

    #[test]
    fn test_valuesearch_params() {
        let params = ValuesearchParams::from_querystring(
            "valueSearchPropertyPath=creator&valueSearchText=pat&cardSearchFilter[resourceType]=Preprint",
        )
        .unwrap();
        assert_eq!(params.valuesearch_propertypath, Propertypath::new([dcterms("creator")]));
        assert_eq!(params.valuesearch_textsegment_set.len(), 1);
        assert_eq!(params.cardsearch.cardsearch_filter_set.len(), 1);
        assert!(!params.is_date_valuesearch());

        assert!(matches!(
            ValuesearchParams::from_querystring("cardSearchText=x"),
            Err(ParamError::MissingValuesearchPropertypath)
        ));
        assert!(matches!(
            ValuesearchParams::from_querystring(
                "valueSearchPropertyPath=dateCreated&valueSearchText=x"
            ),
            Err(ParamError::UnsupportedDateValuesearch { .. })
        ));
    }

    #[test]
    fn test_daterange_value() {
        assert_eq!(daterange_value("2020").unwrap(), "2020||/y");
        assert_eq!(daterange_value(" 2020-02 ").unwrap(), "2020-02||/M");
        assert_eq!(daterange_value("2020-02-02").unwrap(), "2020-02-02||/d");
        assert!(daterange_value("02/02/2020").is_none());
        assert_eq!(daterange_value("2024-02-29").unwrap(), "2024-02-29||/d");
        for impossible in ["2020-13", "2020-00", "2020-02-31", "2020-00-00", "2021-02-29"] {
            assert!(daterange_value(impossible).is_none(), "{impossible}");
        }
    }

    #[test]
    fn test_querystring_with_cursor() {
        let params =
            CardsearchParams::from_querystring("cardSearchText=a+b&page[size]=5").unwrap();
        let qs = params.queryparams.querystring_with_cursor("abc=");
        assert_eq!(qs, "cardSearchText=a+b&page%5Bcursor%5D=abc%3D");
    }

    #[test]
    fn test_none_of_type_removes_suggestions() {
        let params = CardsearchParams::from_querystring(
            "cardSearchFilter[resourceType]=Agent&cardSearchFilter[resourceType][none-of]=Agent",
        )
        .unwrap();
        assert!(params.related_propertypath_set.is_empty());
    }
}

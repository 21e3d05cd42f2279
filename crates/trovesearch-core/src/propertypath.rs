//! Property paths and their engine field-name codec.
//!
//! A [`Propertypath`] is an ordered list of predicate IRIs from the focus
//! to a value. In documents it appears in two forms:
//!
//! - **keyword**: the JSON array of IRIs, used as a keyword value in
//!   `propertypaths_present` and `at_card_propertypaths`;
//! - **field name**: base64url (padded) of the keyword, used as an object
//!   key under `*_by_propertypath`, so any IRI is a safe field name and
//!   highlight field names decode back to the path.
//!
//! Glob paths (`*`, `*.*`, ...) match any path of that length and are
//! queried through the `*_by_depth` fields instead.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ParamError;
use crate::vocab;

pub const GLOB_STEP: &str = "*";
pub const PATH_STEP_DELIMITER: char = '.';
pub const PATHSET_DELIMITER: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Propertypath(Vec<String>);

pub type PropertypathSet = BTreeSet<Propertypath>;

impl Propertypath {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(steps.into_iter().map(Into::into).collect())
    }

    pub fn glob(depth: usize) -> Self {
        Self(vec![GLOB_STEP.to_string(); depth])
    }

    pub fn steps(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn child(&self, step: &str) -> Self {
        let mut steps = self.0.clone();
        steps.push(step.to_string());
        Self(steps)
    }

    pub fn is_glob(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|s| s == GLOB_STEP)
    }

    pub fn ends_with_date_property(&self) -> bool {
        self.last().map(vocab::is_date_property).unwrap_or(false)
    }

    pub fn keyword(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("[]"))
    }

    pub fn field_name(&self) -> String {
        URL_SAFE.encode(self.keyword())
    }

    pub fn from_keyword(keyword: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(keyword).with_context(|| format!("not json: {keyword:?}"))?;
        let Some(items) = value.as_array() else {
            bail!("expected a json array, got {keyword:?}");
        };
        let mut steps = Vec::with_capacity(items.len());
        for item in items {
            match item.as_str() {
                Some(s) => steps.push(s.to_string()),
                None => bail!("expected only strings in {keyword:?}"),
            }
        }
        Ok(Self(steps))
    }

    pub fn from_field_name(field_name: &str) -> Result<Self> {
        let bytes = URL_SAFE
            .decode(field_name)
            .with_context(|| format!("not base64url: {field_name:?}"))?;
        let keyword = String::from_utf8(bytes).context("field name is not utf-8")?;
        Self::from_keyword(&keyword)
    }

    /// Dotted shorthand form, for display.
    pub fn shorthand(&self) -> String {
        self.0
            .iter()
            .map(|step| {
                if step == GLOB_STEP {
                    step.clone()
                } else {
                    vocab::compact_iri(step)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Propertypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.shorthand())
    }
}

pub fn depth_field_name(depth: usize) -> String {
    format!("depth{depth}")
}

/// Parse one dotted path (`creator.name`, `*.*`, or a single full IRI).
pub fn parse_propertypath(param: &str, text: &str) -> Result<Propertypath, ParamError> {
    let invalid = || ParamError::InvalidPropertypath {
        param: param.to_string(),
        path: text.to_string(),
    };
    if text.is_empty() {
        return Err(invalid());
    }
    if text.contains("://") {
        return Ok(Propertypath::new([text]));
    }
    let mut steps = Vec::new();
    for step in text.split(PATH_STEP_DELIMITER) {
        if step == GLOB_STEP {
            steps.push(GLOB_STEP.to_string());
        } else {
            steps.push(vocab::expand_shorthand(step).ok_or_else(invalid)?);
        }
    }
    let path = Propertypath(steps);
    let has_glob = path.steps().iter().any(|s| s == GLOB_STEP);
    if has_glob && !path.is_glob() {
        return Err(invalid());
    }
    Ok(path)
}

pub fn parse_propertypath_set(param: &str, text: &str) -> Result<PropertypathSet, ParamError> {
    text.split(PATHSET_DELIMITER)
        .map(|p| parse_propertypath(param, p.trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_keyword_and_field_name() {
        let path = Propertypath::new([vocab::dcterms("creator"), vocab::foaf("name")]);
        assert_eq!(
            path.keyword(),
            r#"["http://purl.org/dc/terms/creator","http://xmlns.com/foaf/0.1/name"]"#
        );
        let field = path.field_name();
        assert!(!field.contains('.'));
        assert_eq!(Propertypath::from_field_name(&field).unwrap(), path);
    }

    #[test]
    fn test_from_field_name_rejects_garbage() {
        assert!(Propertypath::from_field_name("!!!").is_err());
        let not_strings = URL_SAFE.encode("[1,2]");
        assert!(Propertypath::from_field_name(&not_strings).is_err());
        let not_array = URL_SAFE.encode(r#"{"a":1}"#);
        assert!(Propertypath::from_field_name(&not_array).is_err());
    }

    #[test]
    fn test_parse_shorthand_paths() {
        let path = parse_propertypath("cardSearchFilter", "creator.name").unwrap();
        assert_eq!(path.steps(), &[vocab::dcterms("creator"), vocab::foaf("name")]);
        assert_eq!(path.to_string(), "creator.name");

        let glob = parse_propertypath("x", "*.*").unwrap();
        assert!(glob.is_glob());
        assert_eq!(glob.len(), 2);

        let iri = parse_propertypath("x", "http://purl.org/dc/terms/title").unwrap();
        assert_eq!(iri.steps(), &[vocab::dcterms("title")]);
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(matches!(
            parse_propertypath("cardSearchFilter[bogus]", "bogus"),
            Err(ParamError::InvalidPropertypath { .. })
        ));
        assert!(parse_propertypath("x", "creator.*").is_err());
        assert!(parse_propertypath("x", "").is_err());
    }

    #[test]
    fn test_parse_set_and_date_ending() {
        let set = parse_propertypath_set("x", "dateCreated,creator.name").unwrap();
        assert_eq!(set.len(), 2);
        let created = parse_propertypath("x", "dateCreated").unwrap();
        assert!(created.ends_with_date_property());
        assert!(!parse_propertypath("x", "title").unwrap().ends_with_date_property());
    }

    proptest! {
        #[test]
        fn prop_field_name_roundtrip(steps in proptest::collection::vec(".*", 0..5)) {
            let path = Propertypath::new(steps);
            let decoded = Propertypath::from_field_name(&path.field_name()).unwrap();
            prop_assert_eq!(decoded, path);
        }
    }
}

//! Triple model.
//!
//! An [`RdfGraph`] is a "tripledict": subject IRI → predicate IRI → set of
//! objects. Every level is a `BTree*`, so iteration order and the canonical
//! JSON serialization are deterministic, which is what makes rebuilt
//! sourcedocs byte-identical and content hashes stable.
//!
//! JSON shape of an object:
//!
//! | Object | JSON |
//! |--------|------|
//! | IRI | `{"@id": "https://..."}` |
//! | literal | `{"@value": "...", "@type"?: "...", "@language"?: "..."}` |
//! | blank node | `{"@blank": {"<predicate>": [<object>, ...]}}` |

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::RdfError;

pub type Twopledict = BTreeMap<String, BTreeSet<RdfObject>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    pub datatype: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "ObjectRepr", into = "ObjectRepr")]
pub enum RdfObject {
    Iri(String),
    Literal(Literal),
    /// Anonymous node, held inline as its own predicate → objects map.
    Blank(Twopledict),
}

impl RdfObject {
    pub fn iri(iri: impl Into<String>) -> Self {
        RdfObject::Iri(iri.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        RdfObject::Literal(Literal {
            value: value.into(),
            datatype: None,
            language: None,
        })
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        RdfObject::Literal(Literal {
            value: value.into(),
            datatype: Some(datatype.into()),
            language: None,
        })
    }

    pub fn lang_literal(value: impl Into<String>, language: impl Into<String>) -> Self {
        RdfObject::Literal(Literal {
            value: value.into(),
            datatype: None,
            language: Some(language.into()),
        })
    }

    pub fn blank<I, P>(twoples: I) -> Self
    where
        I: IntoIterator<Item = (P, RdfObject)>,
        P: Into<String>,
    {
        let mut dict = Twopledict::new();
        for (p, o) in twoples {
            dict.entry(p.into()).or_default().insert(o);
        }
        RdfObject::Blank(dict)
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            RdfObject::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            RdfObject::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ObjectRepr {
    Iri {
        #[serde(rename = "@id")]
        id: String,
    },
    Blank {
        #[serde(rename = "@blank")]
        blank: Twopledict,
    },
    Literal {
        #[serde(rename = "@value")]
        value: String,
        #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(rename = "@language", default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl From<ObjectRepr> for RdfObject {
    fn from(repr: ObjectRepr) -> Self {
        match repr {
            ObjectRepr::Iri { id } => RdfObject::Iri(id),
            ObjectRepr::Blank { blank } => RdfObject::Blank(blank),
            ObjectRepr::Literal {
                value,
                datatype,
                language,
            } => RdfObject::Literal(Literal {
                value,
                datatype,
                language,
            }),
        }
    }
}

impl From<RdfObject> for ObjectRepr {
    fn from(obj: RdfObject) -> Self {
        match obj {
            RdfObject::Iri(id) => ObjectRepr::Iri { id },
            RdfObject::Blank(blank) => ObjectRepr::Blank { blank },
            RdfObject::Literal(Literal {
                value,
                datatype,
                language,
            }) => ObjectRepr::Literal {
                value,
                datatype,
                language,
            },
        }
    }
}

/// Subject → predicate → objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RdfGraph {
    tripledict: BTreeMap<String, Twopledict>,
}

impl RdfGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, RdfError> {
        serde_json::from_str(json).map_err(|e| RdfError::Unparseable(e.to_string()))
    }

    /// Deterministic JSON; identical graphs always serialize identically.
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    pub fn add(&mut self, subject: &str, predicate: &str, object: RdfObject) {
        self.tripledict
            .entry(subject.to_string())
            .or_default()
            .entry(predicate.to_string())
            .or_default()
            .insert(object);
    }

    pub fn has_subject(&self, subject: &str) -> bool {
        self.tripledict.contains_key(subject)
    }

    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.tripledict.keys().map(String::as_str)
    }

    pub fn twopledict(&self, subject: &str) -> Option<&Twopledict> {
        self.tripledict.get(subject)
    }

    pub fn objects<'a>(
        &'a self,
        subject: &str,
        predicate: &str,
    ) -> impl Iterator<Item = &'a RdfObject> + 'a {
        self.tripledict
            .get(subject)
            .and_then(|twoples| twoples.get(predicate))
            .into_iter()
            .flatten()
    }

    /// Follow a predicate path from `subject`, through IRIs and blank nodes.
    pub fn q(&self, subject: &str, path: &[&str]) -> Vec<RdfObject> {
        let mut current: Vec<RdfObject> = vec![RdfObject::Iri(subject.to_string())];
        for step in path {
            let mut next = Vec::new();
            for obj in &current {
                match obj {
                    RdfObject::Iri(iri) => next.extend(self.objects(iri, step).cloned()),
                    RdfObject::Blank(twoples) => {
                        if let Some(objs) = twoples.get(*step) {
                            next.extend(objs.iter().cloned());
                        }
                    }
                    RdfObject::Literal(_) => {}
                }
            }
            current = next;
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        self.tripledict.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RdfGraph {
        let mut g = RdfGraph::new();
        g.add("https://x/a", "http://p/title", RdfObject::literal("hello"));
        g.add("https://x/a", "http://p/ref", RdfObject::iri("https://x/b"));
        g.add(
            "https://x/a",
            "http://p/funding",
            RdfObject::blank([("http://p/name", RdfObject::lang_literal("ERC", "en"))]),
        );
        g.add("https://x/b", "http://p/title", RdfObject::literal("bee"));
        g
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let g = sample();
        let json = g.to_canonical_json();
        let parsed = RdfGraph::from_json(&json).unwrap();
        assert_eq!(parsed, g);
        assert_eq!(parsed.to_canonical_json(), json);
        assert!(json.contains(r#"{"@id":"https://x/b"}"#));
        assert!(json.contains(r#""@language":"en""#));
    }

    #[test]
    fn test_q_follows_iris_and_blanks() {
        let g = sample();
        assert_eq!(
            g.q("https://x/a", &["http://p/ref", "http://p/title"]),
            vec![RdfObject::literal("bee")]
        );
        assert_eq!(
            g.q("https://x/a", &["http://p/funding", "http://p/name"]),
            vec![RdfObject::lang_literal("ERC", "en")]
        );
        assert!(g.q("https://x/a", &["http://p/missing"]).is_empty());
    }

    #[test]
    fn test_unparseable_json() {
        assert!(matches!(
            RdfGraph::from_json("[1,2]"),
            Err(RdfError::Unparseable(_))
        ));
    }
}

//! Cycle-safe depth-first walk of an [`RdfGraph`] from a focus.
//!
//! The walk keeps an explicit stack of frames, one per IRI subject being
//! expanded, and a `visiting` set of the subjects currently on that stack.
//! A subject is pushed before its twoples are walked and popped once they
//! are exhausted, so a node already on the active path is never re-entered
//! (cycles terminate) while the same node reached along a different path
//! is walked again. Depth is bounded by [`WALK_DEPTH_MAX`].
//!
//! Blank nodes are not frames: their twoples are flattened inline into
//! longer paths.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::propertypath::Propertypath;
use crate::rdf::{Literal, RdfGraph, RdfObject, Twopledict};
use crate::vocab;

pub const WALK_DEPTH_MAX: usize = 16;

/// Paths whose values are never indexed nor walked into.
pub fn is_skippable_path(path: &Propertypath) -> bool {
    match path.last() {
        None => false,
        Some(last) => {
            last == vocab::OSFMAP_CONTAINS.as_str()
                || last == vocab::OWL_SAMEAS.as_str()
                || (path.len() > 1 && last == vocab::DCTERMS_IDENTIFIER.as_str())
        }
    }
}

/// Parse an ISO calendar date, accepting the date part of a full datetime.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(dt.date());
        }
    }
    None
}

fn is_text_literal(lit: &Literal) -> bool {
    match &lit.datatype {
        None => true,
        Some(dt) => {
            lit.language.is_some()
                || dt == vocab::RDF_STRING.as_str()
                || dt == vocab::RDF_LANGSTRING.as_str()
                || dt == &vocab::xsd("string")
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphWalk {
    pub focus_iri: String,
    pub paths_walked: BTreeSet<Propertypath>,
    pub iri_values: BTreeMap<Propertypath, BTreeSet<String>>,
    pub text_values: BTreeMap<Propertypath, BTreeSet<String>>,
    pub date_values: BTreeMap<Propertypath, BTreeSet<NaiveDate>>,
    pub integer_values: BTreeMap<Propertypath, BTreeSet<i64>>,
    pub paths_by_iri: BTreeMap<String, BTreeSet<Propertypath>>,
}

struct Frame {
    subject: String,
    pending: VecDeque<(Propertypath, RdfObject)>,
}

impl Frame {
    fn new(twoples: Option<&Twopledict>, subject: &str, base: &Propertypath) -> Self {
        let mut pending = VecDeque::new();
        if let Some(twoples) = twoples {
            flatten_twoples(twoples, base, &mut pending);
        }
        Self {
            subject: subject.to_string(),
            pending,
        }
    }
}

fn flatten_twoples(
    twoples: &Twopledict,
    base: &Propertypath,
    out: &mut VecDeque<(Propertypath, RdfObject)>,
) {
    for (predicate, objects) in twoples {
        let path = base.child(predicate);
        if is_skippable_path(&path) {
            continue;
        }
        for obj in objects {
            out.push_back((path.clone(), obj.clone()));
            if let RdfObject::Blank(inner) = obj {
                if path.len() < WALK_DEPTH_MAX {
                    flatten_twoples(inner, &path, out);
                }
            }
        }
    }
}

impl GraphWalk {
    pub fn walk(graph: &RdfGraph, focus_iri: &str) -> Self {
        Self::walk_with_visiting(graph, focus_iri, HashSet::new())
    }

    /// Walk from a value resource reached from a card, without walking
    /// back into the card's own focus.
    pub fn shortwalk_from(graph: &RdfGraph, iri: &str, card_focus_iri: &str) -> Self {
        let mut visiting = HashSet::new();
        visiting.insert(card_focus_iri.to_string());
        Self::walk_with_visiting(graph, iri, visiting)
    }

    fn walk_with_visiting(graph: &RdfGraph, focus_iri: &str, mut visiting: HashSet<String>) -> Self {
        let mut walk = GraphWalk {
            focus_iri: focus_iri.to_string(),
            ..Default::default()
        };
        let root = Propertypath::default();
        visiting.insert(focus_iri.to_string());
        let mut stack = vec![Frame::new(graph.twopledict(focus_iri), focus_iri, &root)];
        while let Some(frame) = stack.last_mut() {
            let Some((path, obj)) = frame.pending.pop_front() else {
                if let Some(done) = stack.pop() {
                    visiting.remove(&done.subject);
                }
                continue;
            };
            walk.record(&path, &obj);
            if let RdfObject::Iri(iri) = &obj {
                if path.len() < WALK_DEPTH_MAX
                    && graph.has_subject(iri)
                    && !visiting.contains(iri.as_str())
                {
                    visiting.insert(iri.clone());
                    stack.push(Frame::new(graph.twopledict(iri), iri, &path));
                }
            }
        }
        walk
    }

    fn record(&mut self, path: &Propertypath, obj: &RdfObject) {
        self.paths_walked.insert(path.clone());
        match obj {
            RdfObject::Iri(iri) => {
                self.iri_values
                    .entry(path.clone())
                    .or_default()
                    .insert(iri.clone());
                self.paths_by_iri
                    .entry(iri.clone())
                    .or_default()
                    .insert(path.clone());
            }
            RdfObject::Literal(lit) => self.record_literal(path, lit),
            RdfObject::Blank(_) => {}
        }
    }

    fn record_literal(&mut self, path: &Propertypath, lit: &Literal) {
        if path.ends_with_date_property() {
            match parse_date(&lit.value) {
                Some(date) => {
                    self.date_values.entry(path.clone()).or_default().insert(date);
                }
                None => debug!(path = %path, value = %lit.value, "skipping malformed date"),
            }
        } else if lit.datatype.as_deref() == Some(vocab::XSD_INTEGER.as_str()) {
            match lit.value.trim().parse::<i64>() {
                Ok(n) => {
                    self.integer_values.entry(path.clone()).or_default().insert(n);
                }
                Err(_) => debug!(path = %path, value = %lit.value, "skipping malformed integer"),
            }
        } else if is_text_literal(lit) {
            self.text_values
                .entry(path.clone())
                .or_default()
                .insert(lit.value.clone());
        }
    }

    /// Text values directly on the focus at any of `predicates`.
    pub fn texts_at(&self, predicates: &[String]) -> BTreeSet<String> {
        predicates
            .iter()
            .filter_map(|p| self.text_values.get(&Propertypath::new([p.as_str()])))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn has_namelike_value(&self) -> bool {
        self.text_values
            .keys()
            .any(|p| p.len() == 1 && p.last().map(vocab::is_namelike_property).unwrap_or(false))
    }
}

//! Scheme-insensitive IRI canonicalization.
//!
//! Two IRIs that differ only by scheme and carry an authority
//! (`https://x.y/z` vs `http://x.y/z/`) name the same resource. The
//! "sufficiently unique" form strips the scheme (keeping `://`) and any
//! trailing slash on the path; IRIs without an authority (`urn:...`,
//! `mailto:...`) are their own sufficiently unique form.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{IriError, RdfError};
use crate::rdf::RdfGraph;
use crate::vocab::OWL_SAMEAS;

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)([a-z][a-z0-9+\-.]*):").unwrap());

const COLON_SLASH_SLASH: &str = "://";

/// Split an IRI into its lowercased scheme and the rest (starting at `:`).
pub fn split_scheme(iri: &str) -> Result<(String, &str), IriError> {
    let caps = SCHEME_RE
        .captures(iri)
        .ok_or_else(|| IriError::NotAnIri(iri.to_string()))?;
    let scheme = caps
        .get(1)
        .ok_or_else(|| IriError::InvalidScheme(iri.to_string()))?;
    Ok((scheme.as_str().to_lowercase(), &iri[scheme.end()..]))
}

pub fn get_scheme(iri: &str) -> Result<String, IriError> {
    split_scheme(iri).map(|(scheme, _)| scheme)
}

pub fn sufficiently_unique_iri(iri: &str) -> Result<String, IriError> {
    let (_, remainder) = split_scheme(iri)?;
    if let Some(after_authority_marker) = remainder.strip_prefix(COLON_SLASH_SLASH) {
        let (path, rest) = match after_authority_marker.find(['?', '#']) {
            Some(at) => after_authority_marker.split_at(at),
            None => (after_authority_marker, ""),
        };
        let (query, fragment) = match rest.find('#') {
            Some(at) => (&rest[..at], &rest[at + 1..]),
            None => (rest, ""),
        };
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut suffuniq = format!("{COLON_SLASH_SLASH}{}", path.trim_end_matches('/'));
        if !query.is_empty() {
            suffuniq.push('?');
            suffuniq.push_str(query);
        }
        if !fragment.is_empty() {
            suffuniq.push('#');
            suffuniq.push_str(fragment);
        }
        return Ok(suffuniq);
    }
    Ok(iri.to_string())
}

/// Blank-node-ish names (`_:b0`) never count as synonyms.
pub fn is_worthwhile_iri(iri: &str) -> bool {
    !iri.starts_with('_')
}

/// One canonical name for a resource, remembering every scheme it was seen with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub id: i64,
    pub sufficiently_unique_iri: String,
    pub scheme_list: Vec<String>,
    pub raw_iri_list: Vec<String>,
}

impl ResourceIdentifier {
    /// Build a fresh, unsaved identifier from its first sighting.
    pub fn first_seen(iri: &str) -> Result<Self, IriError> {
        Ok(Self {
            id: 0,
            sufficiently_unique_iri: sufficiently_unique_iri(iri)?,
            scheme_list: vec![get_scheme(iri)?],
            raw_iri_list: vec![iri.to_string()],
        })
    }

    /// Record another sighting; returns whether anything changed.
    pub fn observe(&mut self, iri: &str) -> Result<bool, IriError> {
        let scheme = get_scheme(iri)?;
        let mut changed = false;
        if !self.scheme_list.contains(&scheme) {
            self.scheme_list.push(scheme);
            changed = true;
        }
        if !self.raw_iri_list.iter().any(|r| r == iri) {
            self.raw_iri_list.push(iri.to_string());
            changed = true;
        }
        Ok(changed)
    }

    /// An IRI using a scheme actually observed for this resource.
    pub fn as_iri(&self) -> String {
        if !self.sufficiently_unique_iri.starts_with(COLON_SLASH_SLASH) {
            return self.sufficiently_unique_iri.clone();
        }
        let scheme = if self.scheme_list.len() == 1 {
            self.scheme_list[0].as_str()
        } else if self.scheme_list.iter().any(|s| s == "https") {
            "https"
        } else if self.scheme_list.iter().any(|s| s == "http") {
            "http"
        } else {
            self.scheme_list.first().map(String::as_str).unwrap_or("https")
        };
        format!("{scheme}{}", self.sufficiently_unique_iri)
    }

    pub fn equivalent_to_iri(&self, iri: &str) -> bool {
        sufficiently_unique_iri(iri)
            .map(|s| s == self.sufficiently_unique_iri)
            .unwrap_or(false)
    }

    /// Find the subject in `graph` naming this resource, directly or via `owl:sameAs`.
    pub fn find_equivalent_iri(&self, graph: &RdfGraph) -> Result<String, RdfError> {
        let own_iri = self.as_iri();
        if graph.has_subject(&own_iri) {
            return Ok(own_iri);
        }
        for subject in graph.subjects() {
            if self.equivalent_to_iri(subject) {
                return Ok(subject.to_string());
            }
            let via_sameas = graph
                .objects(subject, &OWL_SAMEAS)
                .filter_map(|o| o.as_iri())
                .any(|same| self.equivalent_to_iri(same));
            if via_sameas {
                return Ok(subject.to_string());
            }
        }
        Err(RdfError::IriMismatch(own_iri))
    }
}

//! Namespaces, shorthand names, and the property sets the indexer treats
//! specially (dates, name-like text, skipped predicates).

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

pub const DCTERMS: &str = "http://purl.org/dc/terms/";
pub const FOAF: &str = "http://xmlns.com/foaf/0.1/";
pub const OWL: &str = "http://www.w3.org/2002/07/owl#";
pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
pub const SKOS: &str = "http://www.w3.org/2004/02/skos/core#";
pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const OSFMAP: &str = "https://osf.io/vocab/2022/";
pub const TROVE: &str = "https://share.osf.io/vocab/2023/trove/";

pub const INDEXCARD_IRI_PREFIX: &str = "https://share.osf.io/trove/index-card/";

pub fn dcterms(name: &str) -> String {
    format!("{DCTERMS}{name}")
}

pub fn foaf(name: &str) -> String {
    format!("{FOAF}{name}")
}

pub fn owl(name: &str) -> String {
    format!("{OWL}{name}")
}

pub fn rdf(name: &str) -> String {
    format!("{RDF}{name}")
}

pub fn rdfs(name: &str) -> String {
    format!("{RDFS}{name}")
}

pub fn skos(name: &str) -> String {
    format!("{SKOS}{name}")
}

pub fn xsd(name: &str) -> String {
    format!("{XSD}{name}")
}

pub fn osfmap(name: &str) -> String {
    format!("{OSFMAP}{name}")
}

pub fn trove(name: &str) -> String {
    format!("{TROVE}{name}")
}

pub static RDF_TYPE: Lazy<String> = Lazy::new(|| rdf("type"));
pub static OWL_SAMEAS: Lazy<String> = Lazy::new(|| owl("sameAs"));
pub static DCTERMS_IDENTIFIER: Lazy<String> = Lazy::new(|| dcterms("identifier"));
pub static OSFMAP_CONTAINS: Lazy<String> = Lazy::new(|| osfmap("contains"));
pub static XSD_INTEGER: Lazy<String> = Lazy::new(|| xsd("integer"));
pub static RDF_STRING: Lazy<String> = Lazy::new(|| rdf("string"));
pub static RDF_LANGSTRING: Lazy<String> = Lazy::new(|| rdf("langString"));

pub fn indexcard_iri(uuid: &str) -> String {
    format!("{INDEXCARD_IRI_PREFIX}{uuid}")
}

pub static DATE_PROPERTIES: Lazy<Vec<String>> = Lazy::new(|| {
    let mut props: Vec<String> = [
        "date",
        "available",
        "created",
        "modified",
        "dateCopyrighted",
        "dateSubmitted",
        "dateAccepted",
    ]
    .iter()
    .map(|n| dcterms(n))
    .collect();
    props.push(osfmap("dateWithdrawn"));
    props
});

pub static TITLE_PROPERTIES: Lazy<Vec<String>> = Lazy::new(|| vec![dcterms("title")]);

pub static NAME_PROPERTIES: Lazy<Vec<String>> =
    Lazy::new(|| vec![foaf("name"), osfmap("fileName")]);

pub static LABEL_PROPERTIES: Lazy<Vec<String>> =
    Lazy::new(|| vec![rdfs("label"), skos("prefLabel"), skos("altLabel")]);

pub fn is_date_property(iri: &str) -> bool {
    DATE_PROPERTIES.iter().any(|p| p == iri)
}

/// A card whose focus has none of these is not worth indexing.
pub fn is_namelike_property(iri: &str) -> bool {
    TITLE_PROPERTIES
        .iter()
        .chain(NAME_PROPERTIES.iter())
        .chain(LABEL_PROPERTIES.iter())
        .any(|p| p == iri)
}

/// Shorthand names accepted in property paths and filter values.
pub static SHORTHAND: Lazy<BTreeMap<&'static str, String>> = Lazy::new(|| {
    let mut m = BTreeMap::new();
    for name in [
        "identifier",
        "creator",
        "title",
        "publisher",
        "subject",
        "contributor",
        "language",
        "rights",
        "rightsHolder",
        "description",
        "date",
        "dateAccepted",
        "dateAvailable",
        "dateCopyrighted",
        "dateSubmitted",
        "dateModified",
        "hasPart",
        "hasVersion",
        "isPartOf",
        "isVersionOf",
        "references",
        "conformsTo",
    ] {
        m.insert(name, dcterms(name));
    }
    m.insert("dateAvailable", dcterms("available"));
    m.insert("dateModified", dcterms("modified"));
    m.insert("dateCreated", dcterms("created"));
    m.insert("resourceType", rdf("type"));
    m.insert("resourceNature", dcterms("type"));
    m.insert("sameAs", owl("sameAs"));
    m.insert("name", foaf("name"));
    m.insert("label", rdfs("label"));
    m.insert("prefLabel", skos("prefLabel"));
    m.insert("altLabel", skos("altLabel"));
    for name in [
        "affiliation",
        "hasFunding",
        "funder",
        "keyword",
        "dateWithdrawn",
        "fileName",
        "isContainedBy",
        "isPartOfCollection",
        "supplements",
        "isSupplementedBy",
        "hasDataResource",
        "hasPreregisteredAnalysisPlan",
        "hasPreregisteredStudyDesign",
        "hasAnalyticCodeResource",
        "hasMaterialsResource",
        "hasPapersResource",
        "hasSupplementalResource",
        "hasCedarTemplate",
        "storageRegion",
        "hostingInstitution",
        "contains",
        "Preprint",
        "Project",
        "ProjectComponent",
        "Registration",
        "RegistrationComponent",
        "File",
        "Agent",
    ] {
        m.insert(name, osfmap(name));
    }
    m.insert("Person", foaf("Person"));
    m.insert("Organization", foaf("Organization"));
    m
});

/// Expand a shorthand name to its IRI; full IRIs pass through unchanged.
pub fn expand_shorthand(name: &str) -> Option<String> {
    if let Some(iri) = SHORTHAND.get(name) {
        return Some(iri.clone());
    }
    if name.contains(':') {
        return Some(name.to_string());
    }
    None
}

/// Reverse lookup for rendering; returns the IRI itself if it has no shorthand.
pub fn compact_iri(iri: &str) -> String {
    SHORTHAND
        .iter()
        .find(|(_, full)| full.as_str() == iri)
        .map(|(short, _)| short.to_string())
        .unwrap_or_else(|| iri.to_string())
}

/// Suggested related property paths for a resource type, as shorthand steps.
pub fn suggested_propertypaths(type_iri: &str) -> Vec<Vec<&'static str>> {
    let t = compact_iri(type_iri);
    match t.as_str() {
        "Project" | "ProjectComponent" => vec![
            vec!["dateCreated"],
            vec!["funder"],
            vec!["subject"],
            vec!["rights"],
            vec!["resourceNature"],
            vec!["affiliation"],
            vec!["isPartOfCollection"],
            vec!["supplements"],
            vec!["hasCedarTemplate"],
        ],
        "Preprint" => vec![
            vec!["dateCreated"],
            vec!["subject"],
            vec!["rights"],
            vec!["publisher"],
            vec!["affiliation"],
            vec!["hasDataResource"],
            vec!["hasPreregisteredAnalysisPlan"],
            vec!["hasPreregisteredStudyDesign"],
            vec!["isSupplementedBy"],
        ],
        "Registration" | "RegistrationComponent" => vec![
            vec!["dateCreated"],
            vec!["subject"],
            vec!["rights"],
            vec!["resourceNature"],
            vec!["publisher"],
            vec!["funder"],
            vec!["affiliation"],
            vec!["hasAnalyticCodeResource"],
            vec!["hasDataResource"],
            vec!["hasMaterialsResource"],
            vec!["hasPapersResource"],
            vec!["hasSupplementalResource"],
        ],
        "File" => vec![
            vec!["dateCreated"],
            vec!["resourceNature"],
            vec!["isContainedBy", "funder"],
            vec!["isContainedBy", "rights"],
            vec!["hasCedarTemplate"],
        ],
        "Agent" | "Person" | "Organization" => vec![vec!["affiliation"]],
        _ => Vec::new(),
    }
}

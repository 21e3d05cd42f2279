//! Flattened engine documents built from one indexcard's latest RDF.
//!
//! Each indexcard yields one **card doc** (`{"card": {...}}`, id = card
//! uuid) and one **iri-value doc** per IRI reached from the focus
//! (`{"card": {...}, "iri_value": {...}}`, id = `<uuid>-<base64url(iri)>`).
//! Card fields hold the full walk from the focus; iri-value fields hold
//! a short walk from the value itself, for valuesearch.
//!
//! All maps are `BTreeMap`-backed and all lists sorted and deduplicated,
//! so building the same card twice yields byte-identical JSON.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::iri::{is_worthwhile_iri, sufficiently_unique_iri};
use crate::propertypath::{depth_field_name, Propertypath};
use crate::rdf::RdfGraph;
use crate::store::IndexcardRdf;
use crate::vocab;
use crate::walk::GraphWalk;

/// The IRI plus its worthwhile `owl:sameAs` objects in `graph`.
pub fn iri_synonyms(graph: &RdfGraph, iri: &str) -> BTreeSet<String> {
    let mut synonyms = BTreeSet::from([iri.to_string()]);
    synonyms.extend(
        graph
            .objects(iri, &vocab::OWL_SAMEAS)
            .filter_map(|o| o.as_iri())
            .filter(|same| is_worthwhile_iri(same))
            .map(str::to_string),
    );
    synonyms
}

fn suffuniq_set<'a>(iris: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    iris.into_iter()
        .filter_map(|iri| sufficiently_unique_iri(iri).ok())
        .collect()
}

pub fn iri_value_doc_id(card_uuid: &str, iri: &str) -> String {
    format!("{card_uuid}-{}", URL_SAFE.encode(iri))
}

fn sorted_list<T: Into<Value> + Clone>(items: impl IntoIterator<Item = T>) -> Value {
    Value::Array(items.into_iter().map(Into::into).collect())
}

/// The per-path and per-depth buckets shared by card and iri-value docs.
pub fn paths_and_values(walk: &GraphWalk, graph: &RdfGraph) -> Value {
    let focus_synonyms = iri_synonyms(graph, &walk.focus_iri);

    let mut iri_by_path = Map::new();
    let mut iri_by_depth: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (path, iris) in &walk.iri_values {
        let mut suffuniqs = BTreeSet::new();
        for iri in iris {
            suffuniqs.extend(suffuniq_set(&iri_synonyms(graph, iri)));
        }
        iri_by_depth
            .entry(depth_field_name(path.len()))
            .or_default()
            .extend(suffuniqs.iter().cloned());
        iri_by_path.insert(path.field_name(), sorted_list(suffuniqs));
    }

    let mut text_by_path = Map::new();
    let mut text_by_depth: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (path, texts) in &walk.text_values {
        text_by_depth
            .entry(depth_field_name(path.len()))
            .or_default()
            .extend(texts.iter().cloned());
        text_by_path.insert(path.field_name(), sorted_list(texts.iter().cloned()));
    }

    let date_by_path: Map<String, Value> = walk
        .date_values
        .iter()
        .map(|(path, dates)| {
            let formatted = dates.iter().map(|d| d.format("%Y-%m-%d").to_string());
            (path.field_name(), sorted_list(formatted))
        })
        .collect();

    let int_by_path: Map<String, Value> = walk
        .integer_values
        .iter()
        .map(|(path, ints)| (path.field_name(), sorted_list(ints.iter().copied())))
        .collect();

    // glob keywords mark every depth reached, whatever the value kind
    let propertypaths_present: BTreeSet<String> = walk
        .paths_walked
        .iter()
        .flat_map(|path| [path.keyword(), Propertypath::glob(path.len()).keyword()])
        .collect();

    let by_depth = |buckets: BTreeMap<String, BTreeSet<String>>| -> Map<String, Value> {
        buckets
            .into_iter()
            .map(|(depth, values)| (depth, sorted_list(values)))
            .collect()
    };

    json!({
        "focus_iri": {
            "exact": sorted_list(focus_synonyms.iter().cloned()),
            "suffuniq": sorted_list(suffuniq_set(&focus_synonyms)),
        },
        "propertypaths_present": sorted_list(propertypaths_present),
        "iri_by_propertypath": iri_by_path,
        "iri_by_depth": by_depth(iri_by_depth),
        "text_by_propertypath": text_by_path,
        "text_by_depth": by_depth(text_by_depth),
        "date_by_propertypath": date_by_path,
        "int_by_propertypath": int_by_path,
    })
}

/// Builds the documents for one indexcard.
pub struct SourcedocBuilder<'a> {
    rdf: &'a IndexcardRdf,
    walk: GraphWalk,
}

impl<'a> SourcedocBuilder<'a> {
    pub fn new(rdf: &'a IndexcardRdf) -> Self {
        let walk = GraphWalk::walk(&rdf.rdf, &rdf.focus_iri);
        Self { rdf, walk }
    }

    pub fn walk(&self) -> &GraphWalk {
        &self.walk
    }

    pub fn card_doc_id(&self) -> &str {
        &self.rdf.indexcard_uuid
    }

    /// Superseded records and foci without any name-like text are not indexed.
    pub fn should_skip(&self) -> bool {
        if self.rdf.is_superseded {
            debug!(card = %self.rdf.indexcard_uuid, "skipping superseded card");
            return true;
        }
        if !self.walk.has_namelike_value() {
            debug!(card = %self.rdf.indexcard_uuid, "skipping card without name-like value");
            return true;
        }
        false
    }

    fn card_fields(&self) -> Value {
        let mut card = paths_and_values(&self.walk, &self.rdf.rdf);
        if let Value::Object(fields) = &mut card {
            fields.insert("card_iri".into(), json!(self.rdf.indexcard_iri()));
            fields.insert("card_uuid".into(), json!(self.rdf.indexcard_uuid));
            fields.insert(
                "suid".into(),
                json!({
                    "source_config_label": self.rdf.source_config_label,
                    "source_record_identifier": self.rdf.source_record_identifier,
                }),
            );
        }
        card
    }

    pub fn build_card_doc(&self) -> Value {
        json!({ "card": self.card_fields() })
    }

    fn iri_value_fields(&self, iri: &str, card_paths: &BTreeSet<Propertypath>) -> Value {
        let short = GraphWalk::shortwalk_from(&self.rdf.rdf, iri, &self.rdf.focus_iri);
        let synonyms = iri_synonyms(&self.rdf.rdf, iri);
        let mut fields = paths_and_values(&short, &self.rdf.rdf);
        if let Value::Object(map) = &mut fields {
            map.insert("value_iri".into(), json!(iri));
            map.insert(
                "value_iris".into(),
                json!({
                    "exact": sorted_list(synonyms.iter().cloned()),
                    "suffuniq": sorted_list(suffuniq_set(&synonyms)),
                }),
            );
            let type_path = Propertypath::new([vocab::RDF_TYPE.as_str()]);
            map.insert(
                "value_type".into(),
                sorted_list(short.iri_values.get(&type_path).into_iter().flatten().cloned()),
            );
            map.insert(
                "value_name".into(),
                sorted_list(short.texts_at(&vocab::NAME_PROPERTIES)),
            );
            map.insert(
                "value_title".into(),
                sorted_list(short.texts_at(&vocab::TITLE_PROPERTIES)),
            );
            map.insert(
                "value_label".into(),
                sorted_list(short.texts_at(&vocab::LABEL_PROPERTIES)),
            );
            map.insert(
                "at_card_propertypaths".into(),
                sorted_list(card_paths.iter().map(Propertypath::keyword)),
            );
        }
        fields
    }

    /// `(doc id, doc)` for every worthwhile IRI reached from the focus.
    pub fn build_iri_value_docs(&self) -> Vec<(String, Value)> {
        let card = self.card_fields();
        self.walk
            .paths_by_iri
            .iter()
            .filter(|(iri, _)| is_worthwhile_iri(iri) && iri.as_str() != self.rdf.focus_iri)
            .map(|(iri, paths)| {
                let doc = json!({
                    "card": card.clone(),
                    "iri_value": self.iri_value_fields(iri, paths),
                });
                (iri_value_doc_id(&self.rdf.indexcard_uuid, iri), doc)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::RdfObject;
    use crate::vocab::{dcterms, foaf, osfmap, owl, rdf};

    fn card(graph: RdfGraph) -> IndexcardRdf {
        IndexcardRdf {
            indexcard_uuid: "7d3a1f6e-0000-4000-8000-000000000001".into(),
            focus_iri: "https://x/item".into(),
            rdf: graph,
            content_hash: String::new(),
            source_config_label: "test".into(),
            source_record_identifier: "rec-1".into(),
            is_superseded: false,
        }
    }

    fn graph() -> RdfGraph {
        let mut g = RdfGraph::new();
        g.add("https://x/item", &dcterms("title"), RdfObject::literal("hello"));
        g.add("https://x/item", &dcterms("created"), RdfObject::literal("2020-02-02"));
        g.add("https://x/item", &rdf("type"), RdfObject::iri(osfmap("Preprint")));
        g.add("https://x/item", &owl("sameAs"), RdfObject::iri("http://doi.org/10.1/x"));
        g.add("https://x/item", &dcterms("creator"), RdfObject::iri("https://x/pat"));
        g.add("https://x/pat", &foaf("name"), RdfObject::literal("Pat"));
        g.add("https://x/pat", &owl("sameAs"), RdfObject::iri("_:ignored"));
        g
    }

    #[test]
    fn test_card_doc_shape() {
        let rdf = card(graph());
        let builder = SourcedocBuilder::new(&rdf);
        assert!(!builder.should_skip());
        let doc = builder.build_card_doc();
        let c = &doc["card"];
        assert_eq!(c["card_uuid"], "7d3a1f6e-0000-4000-8000-000000000001");
        assert_eq!(
            c["card_iri"],
            "https://share.osf.io/trove/index-card/7d3a1f6e-0000-4000-8000-000000000001"
        );
        assert_eq!(c["suid"]["source_record_identifier"], "rec-1");
        assert_eq!(
            c["focus_iri"]["suffuniq"],
            json!(["://doi.org/10.1/x", "://x/item"])
        );
        let created = Propertypath::new([dcterms("created")]);
        assert_eq!(c["date_by_propertypath"][created.field_name()], json!(["2020-02-02"]));
        let title = Propertypath::new([dcterms("title")]);
        assert_eq!(c["text_by_propertypath"][title.field_name()], json!(["hello"]));
        assert_eq!(c["text_by_depth"]["depth1"], json!(["hello"]));
        assert_eq!(c["text_by_depth"]["depth2"], json!(["Pat"]));
        let creator = Propertypath::new([dcterms("creator")]);
        assert_eq!(c["iri_by_propertypath"][creator.field_name()], json!(["://x/pat"]));
        let present = c["propertypaths_present"].as_array().unwrap();
        assert!(present.contains(&json!(creator.keyword())));
        assert!(present.contains(&json!(Propertypath::glob(1).keyword())));
        assert!(present.contains(&json!(Propertypath::glob(2).keyword())));
        assert!(!present.contains(&json!(Propertypath::glob(3).keyword())));
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let rdf = card(graph());
        let first = serde_json::to_string(&SourcedocBuilder::new(&rdf).build_card_doc()).unwrap();
        let second = serde_json::to_string(&SourcedocBuilder::new(&rdf).build_card_doc()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_iri_value_docs() {
        let rdf = card(graph());
        let docs = SourcedocBuilder::new(&rdf).build_iri_value_docs();
        let ids: Vec<&str> = docs.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&iri_value_doc_id(&rdf.indexcard_uuid, "https://x/pat").as_str()));
        let (_, pat) = docs
            .iter()
            .find(|(_, d)| d["iri_value"]["value_iri"] == "https://x/pat")
            .unwrap();
        assert_eq!(pat["iri_value"]["value_name"], json!(["Pat"]));
        assert_eq!(pat["iri_value"]["value_iris"]["exact"], json!(["https://x/pat"]));
        assert_eq!(
            pat["iri_value"]["at_card_propertypaths"],
            json!([Propertypath::new([dcterms("creator")]).keyword()])
        );
        assert_eq!(pat["card"]["card_uuid"], rdf.indexcard_uuid.as_str());
    }

    #[test]
    fn test_skip_without_namelike_or_superseded() {
        let mut g = RdfGraph::new();
        g.add("https://x/item", &dcterms("description"), RdfObject::literal("no name"));
        let rdf = card(g);
        assert!(SourcedocBuilder::new(&rdf).should_skip());

        let mut superseded = card(graph());
        superseded.is_superseded = true;
        assert!(SourcedocBuilder::new(&superseded).should_skip());
    }
}

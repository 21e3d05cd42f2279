//! # Trovesearch Core
//!
//! Runtime-agnostic logic for the trovesearch indexing subsystem: IRI
//! canonicalization, the RDF model and graph walk, sourcedoc building,
//! search parameter parsing, cursors, the engine query model, and the
//! index-strategy contract.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Storage and
//! search-engine access go through the [`store`] and [`engine`] traits,
//! each with an in-memory implementation used by tests and by the
//! native crate's `--memory` mode.
//!
//! | Module | Role |
//! |--------|------|
//! | [`iri`] | sufficiently-unique IRIs and [`iri::ResourceIdentifier`] |
//! | [`vocab`] | namespaces, shorthand names, date/name-like properties |
//! | [`rdf`] | triple model ([`rdf::RdfGraph`]) |
//! | [`propertypath`] | property paths and their field-name codec |
//! | [`walk`] | cycle-safe graph walk from a focus |
//! | [`sourcedoc`] | flattened documents built from a walk |
//! | [`params`] | cardsearch/valuesearch parameter parsing |
//! | [`cursor`] | pagination state and its opaque encoding |
//! | [`query`] | engine query/aggregation model |
//! | [`engine`] | [`engine::SearchEngine`] trait + in-memory engine |
//! | [`store`] | indexcard store and identifier registry traits |
//! | [`messages`] | index messages and per-message responses |
//! | [`response`] | search responses |
//! | [`strategy`] | index strategies and their lifecycle |

pub mod cursor;
pub mod engine;
pub mod error;
pub mod iri;
pub mod messages;
pub mod params;
pub mod propertypath;
pub mod query;
pub mod rdf;
pub mod response;
pub mod sourcedoc;
pub mod store;
pub mod strategy;
pub mod vocab;
pub mod walk;

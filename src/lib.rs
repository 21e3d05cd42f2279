//! # trovesearch
//!
//! Search indexing for scholarly metadata. RDF indexcards are stored in
//! SQLite, flattened by an index strategy into Elasticsearch documents, and
//! served back through cardsearch and valuesearch.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────┐   ┌──────────────┐
//! │  Indexcards  │──▶│ Message queues │──▶│   Indexer    │
//! │   (SQLite)   │   │ (per strategy) │   │   daemons    │
//! └──────────────┘   └────────────────┘   └──────┬───────┘
//!                                                ▼
//!                    ┌──────────┐         ┌──────────────┐
//!                    │ CLI/HTTP │◀───────▶│ Elasticsearch│
//!                    │ (trove)  │         │   indexes    │
//!                    └──────────┘         └──────────────┘
//! ```
//!
//! Domain logic (IRIs, RDF, sourcedocs, search params, cursors, the strategy
//! contract) lives in `trovesearch-core`; this crate adds the native services.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Indexcard store, identifier registry, backfill records |
//! | [`elastic`] | Elasticsearch engine |
//! | [`queue`] | Message queues |
//! | [`messenger`] | Routing messages to strategy queues |
//! | [`daemon`] | Indexing daemons |
//! | [`admin`] | Index lifecycle and card maintenance |
//! | [`search`] | Cardsearch and valuesearch entry points |
//! | [`server`] | HTTP server |
//! | [`services`] | Shared process wiring |
//! | [`progress`] | Backfill progress reporting |

pub mod admin;
pub mod config;
pub mod daemon;
pub mod db;
pub mod elastic;
pub mod messenger;
pub mod migrate;
pub mod progress;
pub mod queue;
pub mod search;
pub mod server;
pub mod services;
pub mod sqlite_store;

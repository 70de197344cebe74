//! # ontotag
//!
//! Ontology-driven tagging and search indexing for document repositories.
//!
//! ontotag mirrors ontology terms from a SPARQL graph store into a
//! percolator index, follows a repository's RSS feed, pulls each new item's
//! metadata and primary bitstream, extracts the text, tags the document
//! with every term whose stored phrase query matches it, and writes the
//! result to a documents index that the HTTP API searches.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────────────────┐   ┌──────────────┐
//! │ Repository │──▶│ Pipeline (bus + stages)    │──▶│ documents    │
//! │ feed/REST  │   │ metadata→bitstream→extract │   │ index        │
//! └────────────┘   │        →tag→index          │   └──────┬───────┘
//!                  └─────────────┬──────────────┘          │
//! ┌────────────┐   ┌─────────────▼──┐               ┌──────▼───────┐
//! │ SPARQL     │──▶│ terms index    │               │ HTTP / CLI   │
//! │ graph      │   │ (percolator)   │               │ search       │
//! └────────────┘   └────────────────┘               └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ontotag init                  # state database + indices
//! ontotag sync-terms            # mirror every configured terminology
//! ontotag schedule              # poll the feed and ingest new items
//! ontotag search --keywords ocean,salinity
//! ontotag serve                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Repository items, terms, indexed documents, search options |
//! | [`index_client`] | Index store REST client (scroll, bulk, percolate) |
//! | [`indices`] | Index mappings and bootstrap |
//! | [`query`] | Search query construction |
//! | [`search`] | Search parameters, execution, suggestions |
//! | [`get`] | Indexed document lookup |
//! | [`sparql`] | SPARQL SELECT client |
//! | [`term_sync`] | Terminology mirroring into the terms index |
//! | [`synonyms`] | Keyword synonym expansion |
//! | [`tagger`] | Percolation tagging |
//! | [`retag`] | Bulk retagging of indexed documents |
//! | [`repository`] | Source repository client and feed parsing |
//! | [`object_store`] | Filesystem, memory, and S3 object stores |
//! | [`extract`] | Text extraction backends |
//! | [`bus`] | Events, topics, and the in-process bus |
//! | [`stages`] | Ingestion pipeline stages |
//! | [`pipeline`] | Pipeline runner and state store |
//! | [`db`] | State database connection and checkpoints |
//! | [`migrate`] | Schema migrations |
//! | [`progress`] | Term sync progress reporting |
//! | [`stats`] | Index and pipeline overview |
//! | [`server`] | HTTP API |

pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod get;
mod http;
pub mod index_client;
pub mod indices;
pub mod migrate;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod repository;
pub mod retag;
pub mod search;
pub mod server;
pub mod sparql;
pub mod stages;
pub mod stats;
pub mod synonyms;
pub mod tagger;
pub mod term_sync;

//! # KB Harness
//!
//! Turns seed URLs or local paths into searchable knowledge bases for
//! research agents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Crawler  │──▶│ Normalizer │──▶│ Index Builder │──▶│ SQLite store │
//! └──────────┘   └────────────┘   └───────┬───────┘   └──────────────┘
//!                                         │
//!                      ┌──────────────────┤
//!                      ▼                  ▼
//!                 ┌──────────┐      ┌──────────┐
//!                 │   CLI    │      │   HTTP   │
//!                 │  (kbh)   │      │  (axum)  │
//!                 └──────────┘      └──────────┘
//! ```
//!
//! A collection's name is derived from the sorted set of locations it was
//! built from, so rebuilding the same inputs reuses the stored collection
//! instead of re-embedding it.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`fetch`] | HTTP fetcher boundary |
//! | [`crawl`] | Sitemap-seeded BFS crawler |
//! | [`extract`] | HTML, text, PDF and DOCX extraction |
//! | [`paths`] | Local path expansion |
//! | [`chunk`] | Token-window splitting |
//! | [`normalize`] | Locations → document records |
//! | [`naming`] | Deterministic collection names |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Vector store boundary and implementations |
//! | [`lexical`] | BM25 index |
//! | [`retriever`] | Weighted reciprocal rank fusion |
//! | [`index`] | Build-or-reuse of hybrid indexes |
//! | [`lifecycle`] | Collection eviction |
//! | [`kb`] | Pipeline orchestration |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod crawl;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod kb;
pub mod lexical;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod naming;
pub mod normalize;
pub mod paths;
pub mod retriever;
pub mod server;
pub mod store;

//! # Chunkforge
//!
//! A marker-preserving document re-chunking and indexing engine.
//!
//! Chunkforge ingests a document's pages, keeps an editable full-text
//! representation whose `<<<PAGE:n>>>` marker lines preserve page identity
//! through arbitrary edits, derives page and chunk spans under a
//! configurable strategy, and commits content-addressed records into
//! per-embedding-model search indices. Commits are idempotent because
//! records are keyed by content hash.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Extractor │──▶│ Marker codec │──▶│ Span + chunk  │──▶│ Session  │
//! │ PDF/text  │   │ encode/decode│   │  derivation   │   │ (v1..vN) │
//! └───────────┘   └──────────────┘   └───────────────┘   └────┬─────┘
//!                                                             │ commit job
//!                                                             ▼
//!                                                   ┌──────────────────┐
//!                                                   │ Per-model index  │
//!                                                   │ (records by hash)│
//!                                                   └──────────────────┘
//! ```
//!
//! Every user edit re-enters through the strict marker decoder, re-derives
//! all spans, and bumps the session version by exactly one; stale writers
//! get a version conflict instead of silently clobbering newer state.
//!
//! ## Quick Start
//!
//! ```bash
//! forge init                          # create database
//! forge ingest report.pdf             # extract pages, create a session
//! forge sessions                      # list sessions
//! forge commit <session-id> --model text-embedding-3-small
//! forge search "liability clause" --model text-embedding-3-small
//! forge serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`marker`] | Page-marker encode/decode |
//! | [`spans`] | Page span derivation |
//! | [`chunk`] | Chunk derivation (chars, paragraph, heading) |
//! | [`hashing`] | Content addressing |
//! | [`session`] | Session lifecycle and versioned mutation |
//! | [`index_router`] | Per-model index naming and dimension checks |
//! | [`index_store`] | Index store trait + SQLite/memory implementations |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`jobs`] | Background commit jobs |
//! | [`extract`] | PDF/plain-text extraction |
//! | [`normalize`] | Pre-derivation text normalization |
//! | [`store`] | Session/job persistence |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod errors;
pub mod extract;
pub mod hashing;
pub mod index_router;
pub mod index_store;
pub mod jobs;
pub mod marker;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod server;
pub mod session;
pub mod spans;
pub mod store;

pub use errors::{Error, Result};
pub use models::{
    ChunkMetadata, ChunkSpan, ChunkStrategy, ExtractMeta, PageSpan, RawPage, Session, SplitMode,
};
pub use session::create_session;

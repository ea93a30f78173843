//! # kb-sync
//!
//! Keeps a vector store in step with a help-desk knowledge base.
//!
//! kb-sync pages through the articles of a help-desk source, decides which
//! ones changed since the last import, embeds their text, and upserts them
//! into a vector store under ids derived from the source ids. Only one sync
//! runs at a time; record-level failures are counted and skipped so a run
//! always makes forward progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────────┐
//! │  Help-desk  │──▶│ Change detect → Embed →  │──▶│ Vector store │
//! │  list/detail│   │ Batch upsert (per page)  │   │ mem/sqlite/  │
//! └─────────────┘   └────────────┬─────────────┘   │ weaviate     │
//!                                │                 └──────────────┘
//!                     ┌──────────┴──────────┐
//!                     ▼                     ▼
//!                ┌──────────┐         ┌──────────┐
//!                │   CLI    │         │   HTTP   │
//!                │ (kbsync) │         │ /import  │
//!                └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbsync init              # create the collection
//! kbsync sync              # incremental import
//! kbsync sync --reset      # drop and reimport everything
//! kbsync serve             # start the HTTP control server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Source and destination article types, deterministic ids |
//! | [`timestamp`] | Date normalization and tolerant comparison |
//! | [`traits`] | The [`ArticleSource`](traits::ArticleSource) extension trait |
//! | [`connector_helpdesk`] | Help-desk HTTP connector |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store trait and backends |
//! | [`db`] | SQLite connection for the `sqlite` store |
//! | [`schema`] | Collection creation and reset |
//! | [`change`] | Change detection |
//! | [`batch`] | Bounded batch upserts |
//! | [`run_state`] | Single-flight sync run and counters |
//! | [`ingest`] | Sync orchestration |
//! | [`progress`] | Progress reporting |
//! | [`error`] | Typed errors |
//! | [`http`] | Outbound HTTP retry helper |
//! | [`server`] | HTTP control server |

pub mod batch;
pub mod change;
pub mod config;
pub mod connector_helpdesk;
pub mod db;
pub mod embedding;
pub mod error;
pub mod http;
pub mod ingest;
pub mod models;
pub mod progress;
pub mod run_state;
pub mod schema;
pub mod server;
pub mod store;
pub mod timestamp;
pub mod traits;

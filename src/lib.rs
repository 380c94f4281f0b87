//! # Doc Analyst
//!
//! A local-first forensic analysis pipeline for chat exports and documents.
//!
//! Uploaded files are normalized into message sequences, cut into
//! overlapping windows and analyzed by an on-device model. Windows the
//! local model is unsure about are escalated to a cloud model only when the
//! case grants consent. Findings are scored against the STIM pillars and
//! rendered into a deterministic, hash-sealed markdown report.
//!
//! The runtime-free logic lives in `doc-analyst-core`; this crate adds
//! SQLite persistence, HTTP inference clients, the tokio orchestrator, the
//! CLI commands and the HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Uploads   │──▶│  Ingestion   │──▶│  SQLite  │
//! │ chat / PDF  │   │  (core)      │   │  cases   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                   ┌──────────────┐        │
//!                   │ Orchestrator │◀───────┤
//!                   │ local/cloud  │        │
//!                   └──────┬───────┘        │
//!                          ▼                ▼
//!                     ┌──────────┐    ┌──────────┐
//!                     │   CLI    │    │   HTTP   │
//!                     │(analyst) │    │  (axum)  │
//!                     └──────────┘    └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the case store |
//! | [`extract`] | PDF text extraction |
//! | [`ingest`] | File upload into a case |
//! | [`inference`] | Ollama and OpenAI inference clients |
//! | [`orchestrator`] | Per-case analysis runs |
//! | [`progress`] | CLI progress reporters |
//! | [`case_cmd`] | Case management commands |
//! | [`report_cmd`] | Report generation, export and verification |
//! | [`server`] | HTTP API |

pub mod case_cmd;
pub mod config;
pub mod db;
pub mod extract;
pub mod inference;
pub mod ingest;
pub mod migrate;
pub mod orchestrator;
pub mod progress;
pub mod report_cmd;
pub mod server;
pub mod sqlite_store;

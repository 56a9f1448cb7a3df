//! # Careline
//!
//! A symptom-triage query pipeline with emergency short-circuiting.
//!
//! Careline takes a free-text symptom description and a patient category,
//! screens it for emergencies, scores a coarse risk tier, retrieves grounding
//! passages from a prebuilt SQLite index and asks a hosted LLM for general
//! (non-diagnostic) guidance. The result is rendered as a fixed-template
//! report and recorded on a best-effort basis.
//!
//! ## Architecture
//!
//! ```text
//!  input ──▶ normalize ──▶ safety ──┬──▶ emergency message
//!                                   │
//!                                   └──▶ risk ──▶ retrieval ──▶ generation ──▶ report
//!                                                    │              │            │
//!                                               ┌────▼────┐   ┌─────▼────┐  ┌────▼────┐
//!                                               │ passage │   │ chat API │  │ records │
//!                                               │  index  │   │ (Groq)   │  │ SQLite  │
//!                                               └─────────┘   └──────────┘  └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! careline init                                  # create the record store
//! careline ask "Severe headache, fever, nausea"  # run one query
//! careline ask "baby is not feeding" --patient infant
//! careline labs hemoglobin=10.5 wbc=7000
//! careline serve                                 # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Domain error enum |
//! | [`models`] | Core data types |
//! | [`normalize`] | Symptom normalization |
//! | [`safety`] | Emergency detection |
//! | [`risk`] | Risk scoring |
//! | [`retrieval`] | Retrieval client and search seam |
//! | [`index`] | SQLite passage index (keyword + semantic) |
//! | [`embedding`] | Query embedding providers |
//! | [`generation`] | LLM generation client and providers |
//! | [`report`] | Plain-text report |
//! | [`records`] | Outcome record store |
//! | [`labs`] | Lab value screening |
//! | [`medicine`] | Safe-medicine mentions |
//! | [`pipeline`] | Query orchestrator |
//! | [`server`] | JSON HTTP API |
//! | [`db`] | Database connections |
//! | [`migrate`] | Record store schema |
//! | [`logging`] | Tracing subscriber setup |

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod labs;
pub mod logging;
pub mod medicine;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod report;
pub mod retrieval;
pub mod risk;
pub mod safety;
pub mod server;

pub use error::{CarelineError, Result};
pub use pipeline::QueryOrchestrator;

//! HTTP client and job orchestration for the spreadsheet processing service.
//!
//! Provides multipart payload building, the REST API wrapper, a
//! server-sent-events progress channel with reconnection, the
//! [`orchestrator::JobOrchestrator`] that merges submission and progress
//! into one job state machine, and the result retriever.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod payload;
pub mod progress;
pub mod retriever;
pub mod sse;

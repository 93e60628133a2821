//! Domain types for the xlproc job orchestration client.
//!
//! Everything in this crate is pure: identifiers, the processing
//! function catalog, decoded status events, and the [`job::Job`] record
//! together with the reducer that drives its state machine. Network and
//! filesystem concerns live in `xlproc-client`.

pub mod error;
pub mod functions;
pub mod job;
pub mod types;

#![deny(missing_docs)]

//! Core library for the QuickPrep document pipeline server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Inference provider abstraction and adapters.
pub mod inference;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline metrics helpers.
pub mod metrics;
/// Upload pipeline: storage, classification, extraction, enrichment, orchestration.
pub mod pipeline;

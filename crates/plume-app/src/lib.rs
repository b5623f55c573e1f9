//! Manuscript correction service.
//!
//! A DOCX upload is extracted, chunked, proofread by a language engine with
//! bounded concurrency, verified for false positives, and persisted; clients
//! poll a job store for progress. `pipeline` owns the orchestration,
//! `services` the IO-bound building blocks, `text` and `docx` the pure
//! transforms.

pub mod config;
pub mod docx;
pub mod error;
pub mod paths;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod text;

// src/lib.rs
//! Structured extraction of government financial-disclosure filings, with
//! versioned extractors, per-document quality scores and reversible promotion.
//!
//! One document flows `detector -> extractors -> quality -> audit` inside
//! [`pipeline::Pipeline`]; [`orchestrator::Orchestrator`] drives whole populations
//! through it under a chosen extractor version and feeds the
//! [`registry::VersionRegistry`].

pub mod audit;
pub mod config;
pub mod detector;
pub mod documents;
pub mod extractors;
pub mod ocr;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod registry;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod fixtures;

pub use config::EngineConfig;
pub use pipeline::{DocumentOutcome, ExtractionResult, Pipeline};
pub use utils::AppError;

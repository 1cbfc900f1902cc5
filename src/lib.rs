//! predsel - labeled training data for solver-strategy selection.
//!
//! ## Architecture
//!
//! For each formula extracted from a source model, a set of solving
//! backends is run under a wall-clock budget. Their outcomes become the
//! label of a sample whose features describe the formula.
//!
//! - **engine**: interfaces to the external engine, formula generator and
//!   feature generator, plus a bridge-process adapter
//! - **backend**: strategies with timeouts, preference expansion, labeling
//! - **format**: streaming sample codecs (JSON, predicate database, CSV,
//!   legacy predicate dump)
//! - **pipeline**: corpus migration, the generation orchestrator and
//!   dataset splitting
//!
//! ## Failure scopes
//!
//! A failing sample, formula or file is counted and skipped. Only a
//! missing engine or an unusable target directory stops a run.

pub mod backend;
pub mod engine;
pub mod format;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use backend::{Backend, Label, Labeler, Preference, Strategy, TimeoutSpec};
pub use engine::{CommandEngine, Engine};
#[cfg(any(test, feature = "testing"))]
pub use engine::ScriptedEngine;
pub use format::{CsvFormat, Format, JsonFormat, PdumpFormat, PredicateDbFormat};
pub use models::{
    Config, Dataset, DbSample, FeatureSample, FormatKind, GenerationStats, Outcome,
    PipelineError, Result, Sample, TimedOutcome,
};
pub use pipeline::{Generator, RunSummary, migrate, migrate_corpus};

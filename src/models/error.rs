//! Error types for predsel.
//!
//! Every error carries the scope it is fatal for. Callers catch and count
//! errors at that scope and never let them escape further:
//! - Sample: one sample is dropped and counted as failed
//! - Formula: one formula is skipped
//! - File: one source file is skipped and counted as errored
//! - Run: the whole run stops with a non-zero exit status

use std::path::PathBuf;
use thiserror::Error;

/// How far an error is allowed to propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorScope {
    Sample,
    Formula,
    File,
    Run,
}

/// Top-level error type for predsel.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ═══════════════════════════════════════════════════════════════════
    // Per-sample: dropped and counted
    // ═══════════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Label is missing an entry for backend '{backend}'")]
    LabelIntegrity { backend: String },

    // ═══════════════════════════════════════════════════════════════════
    // Per-formula: skipped and logged
    // ═══════════════════════════════════════════════════════════════════

    #[error("Could not translate formula: {0}")]
    FormulaTranslation(String),

    #[error("Every backend failed: {0}")]
    BackendFailure(String),

    // ═══════════════════════════════════════════════════════════════════
    // Per-file: the file is skipped, the walk continues
    // ═══════════════════════════════════════════════════════════════════

    #[error("Could not load model {path}: {message}")]
    MachineAccess { path: PathBuf, message: String },

    #[error("IO error: {context}")]
    FormatIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    // ═══════════════════════════════════════════════════════════════════
    // Per-run: terminate with a descriptive message
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot migrate from {source_format} to {target_format}: sample layouts differ")]
    UnsupportedMigration {
        source_format: String,
        target_format: String,
    },

    #[error("Target directory {path} is unusable: {source}")]
    TargetUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by the external engine collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The formula text could not be parsed or bound.
    #[error("translation failed: {0}")]
    Translation(String),

    /// The source model could not be loaded at all.
    #[error("model could not be loaded: {0}")]
    MachineAccess(String),

    /// The engine raised an error while evaluating.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The engine itself cannot be reached.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl PipelineError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::FormatIo {
            context: context.into(),
            source,
        }
    }

    /// The widest scope this error may abort.
    pub fn scope(&self) -> ErrorScope {
        match self {
            Self::Serialization(_) | Self::LabelIntegrity { .. } => ErrorScope::Sample,
            Self::FormulaTranslation(_) | Self::BackendFailure(_) => ErrorScope::Formula,
            Self::MachineAccess { .. } | Self::FormatIo { .. } | Self::Parse(_) => ErrorScope::File,
            Self::Config(_)
            | Self::InvalidInput(_)
            | Self::UnsupportedMigration { .. }
            | Self::TargetUnavailable { .. }
            | Self::EngineUnavailable(_)
            | Self::Internal(_) => ErrorScope::Run,
        }
    }

    /// Whether the run must stop because of this error.
    pub fn is_fatal(&self) -> bool {
        self.scope() == ErrorScope::Run
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Convert an engine error raised while working on `model`.
pub fn engine_error_for(model: &std::path::Path, err: EngineError) -> PipelineError {
    match err {
        EngineError::Translation(msg) => PipelineError::FormulaTranslation(msg),
        EngineError::MachineAccess(message) => PipelineError::MachineAccess {
            path: model.to_path_buf(),
            message,
        },
        EngineError::Evaluation(msg) => PipelineError::BackendFailure(msg),
        EngineError::Unavailable(msg) => PipelineError::EngineUnavailable(msg),
    }
}

/// Result type alias for predsel.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_follow_taxonomy() {
        assert_eq!(
            PipelineError::Serialization("x".into()).scope(),
            ErrorScope::Sample
        );
        assert_eq!(
            PipelineError::FormulaTranslation("x".into()).scope(),
            ErrorScope::Formula
        );
        let io = PipelineError::io("writing", std::io::Error::other("disk"));
        assert_eq!(io.scope(), ErrorScope::File);
        assert!(!io.is_fatal());
        assert!(PipelineError::EngineUnavailable("gone".into()).is_fatal());
    }

    #[test]
    fn engine_errors_map_to_pipeline_errors() {
        let model = std::path::Path::new("m/a.mch");
        let err = engine_error_for(model, EngineError::MachineAccess("bad".into()));
        assert!(matches!(err, PipelineError::MachineAccess { ref path, .. } if path == model));
        let err = engine_error_for(model, EngineError::Translation("parse".into()));
        assert_eq!(err.scope(), ErrorScope::Formula);
    }
}

//! Interfaces to the external engine collaborators.
//!
//! The engine decides formulas, the formula generator extracts candidate
//! formulas from a model, and the feature generator turns a formula into a
//! feature vector. All three work against an evaluation context opened for
//! one source model. Contexts are never shared between files: each file
//! task acquires its own through [`ContextGuard`], which closes it on every
//! exit path.

use crate::backend::Preference;
use crate::models::EngineError;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Raw answer of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineResult {
    /// The formula holds
    Solved,
    /// The formula does not hold
    Disproved,
    /// The engine could decide neither way
    Inconclusive,
}

/// A constraint-solving engine.
pub trait Engine: Send + Sync + 'static {
    /// Evaluation context bound to one source model.
    type Context: Send + Sync + 'static;

    /// Load `model` and return a fresh context for it.
    fn open_context(&self, model: &Path) -> Result<Self::Context, EngineError>;

    /// Release a context. Must tolerate in-flight or cancelled evaluations.
    fn close_context(&self, context: &Self::Context);

    /// Decide `formula` with the strategy named by `selector`. Blocks.
    fn evaluate(
        &self,
        formula: &str,
        context: &Self::Context,
        selector: &str,
        preferences: &[Preference],
    ) -> Result<EngineResult, EngineError>;

    /// Ask the context to abandon its current evaluation.
    ///
    /// Best effort: returns immediately and never fails.
    fn cancel(&self, context: &Self::Context);
}

/// Extracts candidate formulas (invariants, guards, preconditions) from a model.
pub trait FormulaGenerator<C>: Send + Sync {
    fn generate(&self, context: &C) -> Result<Vec<String>, EngineError>;
}

/// Computes the feature vector of a formula.
pub trait FeatureGenerator<C>: Send + Sync {
    fn generate(&self, formula: &str, context: &C) -> Result<Vec<f64>, EngineError>;
}

/// Scoped evaluation context. The context is closed when the guard drops.
pub struct ContextGuard<E: Engine> {
    engine: Arc<E>,
    context: Arc<E::Context>,
}

impl<E: Engine> ContextGuard<E> {
    pub fn acquire(engine: &Arc<E>, model: &Path) -> Result<Self, EngineError> {
        let context = engine.open_context(model)?;
        debug!(model = %model.display(), "Opened evaluation context");
        Ok(Self {
            engine: Arc::clone(engine),
            context: Arc::new(context),
        })
    }

    pub fn context(&self) -> &Arc<E::Context> {
        &self.context
    }
}

impl<E: Engine> Drop for ContextGuard<E> {
    fn drop(&mut self) {
        self.engine.close_context(&self.context);
        debug!("Closed evaluation context");
    }
}

//! Labeling: run every configured backend on a formula and fold the
//! outcomes into one label.

use crate::backend::Backend;
use crate::engine::Engine;
use crate::models::{
    Config, EngineError, LabelKind, OutcomeKind, PipelineError, PredicateLabel, Result, UNDECIDED,
};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Aggregated result of all backends for one formula.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Label {
    /// Decision time in nanoseconds per backend, [`UNDECIDED`] when a
    /// backend could not decide. Keys are in declaration order.
    Timings(IndexMap<Backend, i64>),
    /// The fastest deciding backend among `candidates`, if any decided.
    Classification {
        candidates: Vec<Backend>,
        selected: Option<usize>,
    },
}

impl Label {
    pub fn selected(&self) -> Option<&Backend> {
        match self {
            Self::Timings(_) => None,
            Self::Classification {
                candidates,
                selected,
            } => selected.and_then(|i| candidates.get(i)),
        }
    }

    /// Positional encoding.
    ///
    /// Timings become one value per backend. A classification becomes a
    /// one-hot vector with one extra trailing slot for "none decided".
    pub fn to_vector(&self) -> Vec<f64> {
        match self {
            Self::Timings(times) => times.values().map(|&t| t as f64).collect(),
            Self::Classification {
                candidates,
                selected,
            } => {
                let mut one_hot = vec![0.0; candidates.len() + 1];
                one_hot[selected.unwrap_or(candidates.len())] = 1.0;
                one_hot
            }
        }
    }

    /// Encoding keyed by backend name. A classification marks the selected
    /// backend with 1 and every other one with 0.
    pub fn to_predicate_label(&self) -> PredicateLabel {
        let mut label = PredicateLabel::new();
        match self {
            Self::Timings(times) => {
                for (backend, &nanos) in times {
                    label.insert(backend.name(), nanos);
                }
            }
            Self::Classification {
                candidates,
                selected,
            } => {
                for (idx, backend) in candidates.iter().enumerate() {
                    label.insert(backend.name(), i64::from(*selected == Some(idx)));
                }
            }
        }
        label
    }

    /// Ensure the label covers exactly `backends`, in that order.
    pub fn check_against(&self, backends: &[Backend]) -> Result<()> {
        let covered: Vec<&Backend> = match self {
            Self::Timings(times) => times.keys().collect(),
            Self::Classification { candidates, .. } => candidates.iter().collect(),
        };

        for (idx, backend) in backends.iter().enumerate() {
            if covered.get(idx) != Some(&backend) {
                return Err(PipelineError::LabelIntegrity {
                    backend: backend.name().to_string(),
                });
            }
        }
        if let Some(extra) = covered.get(backends.len()) {
            return Err(PipelineError::LabelIntegrity {
                backend: extra.name().to_string(),
            });
        }
        Ok(())
    }
}

/// Index of the smallest non-negative time. The earlier index wins ties.
pub fn select_fastest(times: &[i64]) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;
    for (idx, &t) in times.iter().enumerate() {
        if t < 0 {
            continue;
        }
        match best {
            Some((_, fastest)) if t >= fastest => {}
            _ => best = Some((idx, t)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Mean of the measurements after the warm-up run.
///
/// A single measurement is taken as is. Otherwise the first is dropped
/// and the formula counts as undecided if any remaining run was.
fn average_after_warmup(runs: &[i64]) -> i64 {
    let kept = if runs.len() > 1 { &runs[1..] } else { runs };
    if kept.is_empty() || kept.iter().any(|&t| t < 0) {
        return UNDECIDED;
    }
    let total: i128 = kept.iter().map(|&t| i128::from(t)).sum();
    i64::try_from(total / kept.len() as i128).unwrap_or(i64::MAX)
}

fn formula_error(err: EngineError) -> PipelineError {
    match err {
        EngineError::Translation(msg) => PipelineError::FormulaTranslation(msg),
        EngineError::Unavailable(msg) => PipelineError::EngineUnavailable(msg),
        EngineError::MachineAccess(msg) | EngineError::Evaluation(msg) => {
            PipelineError::BackendFailure(msg)
        }
    }
}

/// Runs a fixed backend set and assembles labels.
///
/// Backends run one after another in declaration order, since they share
/// the file's evaluation context.
#[derive(Debug, Clone)]
pub struct Labeler {
    backends: Vec<Backend>,
    kind: LabelKind,
    sampling_size: usize,
}

impl Labeler {
    pub fn new(backends: Vec<Backend>, kind: LabelKind, sampling_size: usize) -> Result<Self> {
        if backends.is_empty() {
            return Err(PipelineError::InvalidInput(
                "at least one backend is required".to_string(),
            ));
        }
        if sampling_size == 0 {
            return Err(PipelineError::InvalidInput(
                "sampling size must be at least 1".to_string(),
            ));
        }
        for (idx, backend) in backends.iter().enumerate() {
            if backends[..idx].iter().any(|b| b.name() == backend.name()) {
                return Err(PipelineError::InvalidInput(format!(
                    "backend name '{}' is used twice",
                    backend.name()
                )));
            }
        }
        Ok(Self {
            backends,
            kind,
            sampling_size,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.build_backends()?,
            config.labels.kind,
            config.labels.sampling_size,
        )
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn kind(&self) -> LabelKind {
        self.kind
    }

    pub fn sampling_size(&self) -> usize {
        self.sampling_size
    }

    /// Label `formula` with every backend.
    ///
    /// Fails with `FormulaTranslation` if the engine rejects the formula,
    /// with `BackendFailure` if every backend errored and with
    /// `EngineUnavailable` if the engine went away.
    pub async fn label<E: Engine>(
        &self,
        engine: &Arc<E>,
        context: &Arc<E::Context>,
        formula: &str,
    ) -> Result<Label> {
        let mut times = Vec::with_capacity(self.backends.len());
        let mut failures = Vec::new();

        for backend in &self.backends {
            let mut runs = Vec::with_capacity(self.sampling_size);
            let mut errored = false;
            for _ in 0..self.sampling_size {
                let timed = backend
                    .decide(engine, context, formula)
                    .await
                    .map_err(formula_error)?;
                if timed.outcome.kind() == OutcomeKind::Error {
                    errored = true;
                    if let Some(msg) = timed.outcome.message() {
                        failures.push(format!("{}: {msg}", backend.name()));
                    }
                }
                runs.push(timed.decision_time());
            }
            if errored {
                warn!(backend = %backend.name(), formula = %formula, "Backend errored");
            }
            times.push((errored, average_after_warmup(&runs)));
        }

        if times.iter().all(|(errored, _)| *errored) {
            return Err(PipelineError::BackendFailure(failures.join("; ")));
        }

        let times: Vec<i64> = times.into_iter().map(|(_, t)| t).collect();
        debug!(formula = %formula, times = ?times, "Labeled formula");

        let label = match self.kind {
            LabelKind::Timings => Label::Timings(
                self.backends.iter().cloned().zip(times).collect(),
            ),
            LabelKind::Classification => Label::Classification {
                candidates: self.backends.clone(),
                selected: select_fastest(&times),
            },
        };
        Ok(label)
    }
}

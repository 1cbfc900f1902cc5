//! In-memory engine with scripted answers.
//!
//! Used to drive the pipeline without an external solver. Evaluations
//! sleep in short slices and give up as soon as their context is
//! cancelled, like a cooperative solver would.

use crate::backend::Preference;
use crate::engine::{Engine, EngineResult, FeatureGenerator, FormulaGenerator};
use crate::models::EngineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const SLICE: Duration = Duration::from_millis(1);

/// What a scripted evaluation answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedResponse {
    Solved,
    Disproved,
    Inconclusive,
    /// Raise an evaluation error with this message
    Fail(String),
    /// Reject the formula text
    Untranslatable,
}

#[derive(Debug, Clone)]
struct Rule {
    selector: Option<String>,
    pattern: String,
    response: ScriptedResponse,
    delay: Duration,
}

/// Context of a [`ScriptedEngine`].
///
/// `cancel` bumps the epoch. An evaluation remembers the epoch it started
/// in and stops once it changes, so a late cancel never hits a newer call.
#[derive(Debug)]
pub struct ScriptedContext {
    model: PathBuf,
    epoch: AtomicU64,
}

impl ScriptedContext {
    pub fn model(&self) -> &Path {
        &self.model
    }
}

/// Engine whose answers are looked up in a rule list.
///
/// The first rule whose selector matches (or has none) and whose pattern
/// occurs in the formula wins. Without a match the formula is solved
/// immediately.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    rules: Vec<Rule>,
    formulas: HashMap<String, Vec<String>>,
    default_formulas: Vec<String>,
    broken_models: Vec<String>,
    unavailable: bool,
    opened: AtomicUsize,
    closed: AtomicUsize,
    cancelled: AtomicUsize,
    abandoned: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(
        mut self,
        selector: Option<&str>,
        pattern: &str,
        response: ScriptedResponse,
        delay: Duration,
    ) -> Self {
        self.rules.push(Rule {
            selector: selector.map(str::to_string),
            pattern: pattern.to_string(),
            response,
            delay,
        });
        self
    }

    /// Formulas for models whose file name is `file_name`.
    pub fn formulas_for(mut self, file_name: &str, formulas: &[&str]) -> Self {
        self.formulas.insert(
            file_name.to_string(),
            formulas.iter().map(|f| f.to_string()).collect(),
        );
        self
    }

    /// Formulas for every other model.
    pub fn default_formulas(mut self, formulas: &[&str]) -> Self {
        self.default_formulas = formulas.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Models whose path contains `fragment` fail to load.
    pub fn broken_model(mut self, fragment: &str) -> Self {
        self.broken_models.push(fragment.to_string());
        self
    }

    /// Every context request fails as if the engine were unreachable.
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Evaluations that stopped early because of a cancel.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    fn lookup(&self, formula: &str, selector: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| {
            rule.selector.as_deref().is_none_or(|s| s == selector)
                && formula.contains(&rule.pattern)
        })
    }
}

impl Engine for ScriptedEngine {
    type Context = ScriptedContext;

    fn open_context(&self, model: &Path) -> Result<ScriptedContext, EngineError> {
        if self.unavailable {
            return Err(EngineError::Unavailable("scripted engine is offline".into()));
        }
        let text = model.to_string_lossy();
        if self.broken_models.iter().any(|b| text.contains(b.as_str())) {
            return Err(EngineError::MachineAccess(format!("cannot load {text}")));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedContext {
            model: model.to_path_buf(),
            epoch: AtomicU64::new(0),
        })
    }

    fn close_context(&self, context: &ScriptedContext) {
        context.epoch.fetch_add(1, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn evaluate(
        &self,
        formula: &str,
        context: &ScriptedContext,
        selector: &str,
        _preferences: &[Preference],
    ) -> Result<EngineResult, EngineError> {
        let epoch = context.epoch.load(Ordering::SeqCst);
        let (response, delay) = match self.lookup(formula, selector) {
            Some(rule) => (rule.response.clone(), rule.delay),
            None => (ScriptedResponse::Solved, Duration::ZERO),
        };

        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if context.epoch.load(Ordering::SeqCst) != epoch {
                self.abandoned.fetch_add(1, Ordering::SeqCst);
                return Err(EngineError::Evaluation("cancelled".into()));
            }
            std::thread::sleep(SLICE.min(deadline.saturating_duration_since(Instant::now())));
        }

        match response {
            ScriptedResponse::Solved => Ok(EngineResult::Solved),
            ScriptedResponse::Disproved => Ok(EngineResult::Disproved),
            ScriptedResponse::Inconclusive => Ok(EngineResult::Inconclusive),
            ScriptedResponse::Fail(msg) => Err(EngineError::Evaluation(msg)),
            ScriptedResponse::Untranslatable => {
                Err(EngineError::Translation(format!("cannot bind '{formula}'")))
            }
        }
    }

    fn cancel(&self, context: &ScriptedContext) {
        context.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

impl FormulaGenerator<ScriptedContext> for ScriptedEngine {
    fn generate(&self, context: &ScriptedContext) -> Result<Vec<String>, EngineError> {
        let name = context
            .model
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(self
            .formulas
            .get(&name)
            .unwrap_or(&self.default_formulas)
            .clone())
    }
}

impl FeatureGenerator<ScriptedContext> for ScriptedEngine {
    /// Length, operator count and identifier count of the formula text.
    fn generate(&self, formula: &str, _context: &ScriptedContext) -> Result<Vec<f64>, EngineError> {
        if formula.trim().is_empty() {
            return Err(EngineError::Translation("empty formula".into()));
        }
        let operators = formula
            .chars()
            .filter(|c| "=<>&|!+-*/:".contains(*c))
            .count();
        let identifiers = formula
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.chars().next().is_some_and(char::is_alphabetic))
            .count();
        Ok(vec![
            formula.len() as f64,
            operators as f64,
            identifiers as f64,
        ])
    }
}

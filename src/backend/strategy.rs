//! Solving strategies and timeout-bounded backends.
//!
//! A [`Backend`] is an immutable value: a strategy, a preference set and a
//! wall-clock budget. Deciding a formula runs the engine on a dedicated
//! blocking worker. If the budget runs out first, the context is sent a
//! cancellation signal and the caller moves on without waiting for the
//! worker to unwind.

use crate::backend::Preference;
use crate::engine::{Engine, EngineResult};
use crate::models::{EngineError, Outcome, TimedOutcome};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Solving strategy offered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Native constraint solver
    Prob,
    /// Relational translation to SAT
    Kodkod,
    /// SMT translation to Z3
    Z3,
    /// CDCL(T)-based solver
    Cdclt,
    /// Constraint solver assisted by SMT
    SmtInterpreter,
}

impl Strategy {
    /// Engine-side selector for this strategy.
    pub fn selector(self) -> &'static str {
        match self {
            Self::Prob => "prob",
            Self::Kodkod => "kodkod",
            Self::Z3 => "z3",
            Self::Cdclt => "cdclt",
            Self::SmtInterpreter => "smt-interpreter",
        }
    }

    /// Human-facing name used in derived backend names.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Prob => "ProB",
            Self::Kodkod => "Kodkod",
            Self::Z3 => "Z3",
            Self::Cdclt => "CDCLT",
            Self::SmtInterpreter => "SmtInterpreter",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Prob,
            Self::Kodkod,
            Self::Z3,
            Self::Cdclt,
            Self::SmtInterpreter,
        ]
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|st| {
                st.selector().eq_ignore_ascii_case(s) || st.display_name().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| format!("unknown strategy '{s}'"))
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Unit of a [`TimeoutSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
}

/// Wall-clock budget: a value and its unit. Defaults to 20 seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeoutSpec {
    pub value: u64,
    pub unit: TimeUnit,
}

impl TimeoutSpec {
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_duration(&self) -> Duration {
        match self.unit {
            TimeUnit::Nanoseconds => Duration::from_nanos(self.value),
            TimeUnit::Microseconds => Duration::from_micros(self.value),
            TimeUnit::Milliseconds => Duration::from_millis(self.value),
            TimeUnit::Seconds => Duration::from_secs(self.value),
            TimeUnit::Minutes => Duration::from_secs(self.value.saturating_mul(60)),
        }
    }
}

impl Default for TimeoutSpec {
    fn default() -> Self {
        Self::new(20, TimeUnit::Seconds)
    }
}

/// One solving strategy bound to a preference set and a timeout.
///
/// Two backends are equal when name, strategy, preferences and timeout all
/// match. Preferences are kept sorted so their order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Backend {
    name: String,
    strategy: Strategy,
    preferences: Vec<Preference>,
    timeout: TimeoutSpec,
}

impl Backend {
    pub fn new(strategy: Strategy, mut preferences: Vec<Preference>, timeout: TimeoutSpec) -> Self {
        preferences.sort();
        preferences.dedup();
        let mut backend = Self {
            name: String::new(),
            strategy,
            preferences,
            timeout,
        };
        backend.name = format!("{}{}", strategy.display_name(), backend.preference_suffix());
        backend
    }

    /// Replace the derived name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn preferences(&self) -> &[Preference] {
        &self.preferences
    }

    pub fn timeout(&self) -> TimeoutSpec {
        self.timeout
    }

    /// `[K=V,...]`, or empty without preferences.
    pub fn preference_suffix(&self) -> String {
        if self.preferences.is_empty() {
            return String::new();
        }
        let joined = self
            .preferences
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        format!("[{joined}]")
    }

    /// Decide `formula` within this backend's timeout.
    ///
    /// Engine errors become [`Outcome::Error`]. Only an untranslatable
    /// formula or an unreachable engine is returned as `Err`, since no
    /// other backend can do better with them.
    pub async fn decide<E: Engine>(
        &self,
        engine: &Arc<E>,
        context: &Arc<E::Context>,
        formula: &str,
    ) -> Result<TimedOutcome, EngineError> {
        let budget = self.timeout.as_duration();
        let start = Instant::now();
        if budget.is_zero() {
            debug!(backend = %self.name, "Zero budget, not dispatching");
            return Ok(TimedOutcome::new(
                Outcome::Timeout(Some("zero budget".to_string())),
                start.elapsed(),
            ));
        }

        let worker = {
            let engine = Arc::clone(engine);
            let context = Arc::clone(context);
            let formula = formula.to_string();
            let selector = self.strategy.selector();
            let preferences = self.preferences.clone();
            tokio::task::spawn_blocking(move || {
                engine.evaluate(&formula, &context, selector, &preferences)
            })
        };

        let outcome = match tokio::time::timeout(budget, worker).await {
            Ok(Ok(Ok(EngineResult::Solved))) => Outcome::Valid(None),
            Ok(Ok(Ok(EngineResult::Disproved))) => Outcome::Invalid(None),
            Ok(Ok(Ok(EngineResult::Inconclusive))) => Outcome::Unknown(None),
            Ok(Ok(Err(e @ (EngineError::Translation(_) | EngineError::Unavailable(_))))) => {
                engine.cancel(context);
                return Err(e);
            }
            Ok(Ok(Err(e))) => {
                engine.cancel(context);
                warn!(backend = %self.name, error = %e, "Engine error");
                Outcome::Error(Some(e.to_string()))
            }
            Ok(Err(e)) => {
                engine.cancel(context);
                warn!(backend = %self.name, error = %e, "Decision worker failed");
                Outcome::Error(Some(format!("worker failed: {e}")))
            }
            Err(_) => {
                // The worker is left to finish on its own.
                engine.cancel(context);
                debug!(backend = %self.name, budget = ?budget, "Decision timed out");
                Outcome::Timeout(Some(format!("no answer within {budget:?}")))
            }
        };

        Ok(TimedOutcome::new(outcome, start.elapsed()))
    }

    /// Elapsed nanoseconds if the formula was decided, otherwise
    /// [`UNDECIDED`](crate::models::UNDECIDED).
    pub async fn measure_decision_time<E: Engine>(
        &self,
        engine: &Arc<E>,
        context: &Arc<E::Context>,
        formula: &str,
    ) -> Result<i64, EngineError> {
        Ok(self.decide(engine, context, formula).await?.decision_time())
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ScriptedEngine, ScriptedResponse};
    use crate::models::{OutcomeKind, UNDECIDED};
    use std::path::Path;

    fn open(engine: &Arc<ScriptedEngine>) -> Arc<<ScriptedEngine as Engine>::Context> {
        Arc::new(engine.open_context(Path::new("model.mch")).unwrap())
    }

    #[test]
    fn equality_covers_all_identity_fields() {
        let a = Backend::new(
            Strategy::Prob,
            vec![Preference::new("B", "1"), Preference::new("A", "2")],
            TimeoutSpec::default(),
        );
        let b = Backend::new(
            Strategy::Prob,
            vec![Preference::new("A", "2"), Preference::new("B", "1")],
            TimeoutSpec::default(),
        );
        assert_eq!(a, b);
        assert_eq!(a.name(), "ProB[A=2,B=1]");
        assert_ne!(a, b.clone().with_name("other"));
        assert_ne!(
            a,
            Backend::new(Strategy::Z3, a.preferences().to_vec(), TimeoutSpec::default())
        );
        assert_ne!(
            a,
            Backend::new(
                Strategy::Prob,
                a.preferences().to_vec(),
                TimeoutSpec::new(20, TimeUnit::Milliseconds)
            )
        );
    }

    #[test]
    fn default_timeout_is_twenty_seconds() {
        assert_eq!(TimeoutSpec::default().as_duration(), Duration::from_secs(20));
        assert_eq!(
            TimeoutSpec::new(2, TimeUnit::Minutes).as_duration(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn strategies_round_trip_through_selectors() {
        for strategy in Strategy::all() {
            assert_eq!(strategy.selector().parse::<Strategy>().unwrap(), *strategy);
        }
        assert!("minisat".parse::<Strategy>().is_err());
    }

    #[tokio::test]
    async fn decides_within_budget() {
        let engine = Arc::new(
            ScriptedEngine::new().rule(None, "x = 1", ScriptedResponse::Disproved, Duration::ZERO),
        );
        let ctx = open(&engine);
        let backend = Backend::new(Strategy::Prob, Vec::new(), TimeoutSpec::default());

        let valid = backend.decide(&engine, &ctx, "x > 0").await.unwrap();
        assert_eq!(valid.outcome.kind(), OutcomeKind::Valid);

        let invalid = backend.decide(&engine, &ctx, "x = 1").await.unwrap();
        assert_eq!(invalid.outcome.kind(), OutcomeKind::Invalid);
        assert!(backend.measure_decision_time(&engine, &ctx, "x = 1").await.unwrap() >= 0);
    }

    #[tokio::test]
    async fn zero_budget_times_out_without_hanging() {
        let engine = Arc::new(ScriptedEngine::new().rule(
            None,
            "slow",
            ScriptedResponse::Solved,
            Duration::from_millis(500),
        ));
        let ctx = open(&engine);
        let backend = Backend::new(
            Strategy::Prob,
            Vec::new(),
            TimeoutSpec::new(0, TimeUnit::Seconds),
        );

        let start = Instant::now();
        let outcome = backend.decide(&engine, &ctx, "slow formula").await.unwrap();
        assert_eq!(outcome.outcome.kind(), OutcomeKind::Timeout);
        assert!(start.elapsed() < Duration::from_millis(400));
        assert_eq!(
            backend.measure_decision_time(&engine, &ctx, "slow formula").await.unwrap(),
            UNDECIDED
        );
    }

    #[tokio::test]
    async fn elapsed_budget_cancels_and_moves_on() {
        let engine = Arc::new(ScriptedEngine::new().rule(
            None,
            "slow",
            ScriptedResponse::Solved,
            Duration::from_secs(5),
        ));
        let ctx = open(&engine);
        let backend = Backend::new(
            Strategy::Prob,
            Vec::new(),
            TimeoutSpec::new(50, TimeUnit::Milliseconds),
        );

        let start = Instant::now();
        let outcome = backend.decide(&engine, &ctx, "slow formula").await.unwrap();
        assert_eq!(outcome.outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(outcome.decision_time(), UNDECIDED);
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.cancellations(), 1);
    }

    #[tokio::test]
    async fn unknown_and_errors_are_undecided() {
        let engine = Arc::new(
            ScriptedEngine::new()
                .rule(None, "maybe", ScriptedResponse::Inconclusive, Duration::ZERO)
                .rule(None, "crash", ScriptedResponse::Fail("boom".into()), Duration::ZERO),
        );
        let ctx = open(&engine);
        let backend = Backend::new(Strategy::Kodkod, Vec::new(), TimeoutSpec::default());

        let unknown = backend.decide(&engine, &ctx, "maybe").await.unwrap();
        assert_eq!(unknown.outcome.kind(), OutcomeKind::Unknown);
        assert_eq!(unknown.decision_time(), UNDECIDED);

        let error = backend.decide(&engine, &ctx, "crash").await.unwrap();
        assert_eq!(error.outcome.kind(), OutcomeKind::Error);
        assert_eq!(error.outcome.message(), Some("evaluation failed: boom"));
        assert_eq!(engine.cancellations(), 1);
    }

    #[tokio::test]
    async fn untranslatable_formula_is_an_error() {
        let engine = Arc::new(ScriptedEngine::new().rule(
            None,
            "((",
            ScriptedResponse::Untranslatable,
            Duration::ZERO,
        ));
        let ctx = open(&engine);
        let backend = Backend::new(Strategy::Z3, Vec::new(), TimeoutSpec::default());
        assert!(matches!(
            backend.decide(&engine, &ctx, "((").await,
            Err(EngineError::Translation(_))
        ));
    }
}

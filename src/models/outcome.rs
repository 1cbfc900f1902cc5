//! Outcome of a single decision attempt.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Decision time reported for a formula a backend could not decide.
pub const UNDECIDED: i64 = -1;

/// Result classification of one decision attempt.
///
/// Each variant may carry a free-text diagnostic from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "lowercase")]
pub enum Outcome {
    Valid(Option<String>),
    Invalid(Option<String>),
    Unknown(Option<String>),
    Timeout(Option<String>),
    Error(Option<String>),
}

/// Variant of an [`Outcome`] without its diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Valid,
    Invalid,
    Unknown,
    Timeout,
    Error,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Valid(_) => OutcomeKind::Valid,
            Self::Invalid(_) => OutcomeKind::Invalid,
            Self::Unknown(_) => OutcomeKind::Unknown,
            Self::Timeout(_) => OutcomeKind::Timeout,
            Self::Error(_) => OutcomeKind::Error,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Valid(m)
            | Self::Invalid(m)
            | Self::Unknown(m)
            | Self::Timeout(m)
            | Self::Error(m) => m.as_deref(),
        }
    }

    /// Only a definite answer counts as solved.
    pub fn is_solvable(&self) -> bool {
        self.kind().is_solvable()
    }
}

impl OutcomeKind {
    pub fn is_solvable(self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unknown => "unknown",
            Self::Timeout => "timeout",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// An outcome plus the wall-clock time it took to produce.
///
/// Equality looks at the outcome variant and the duration only. Two runs
/// that differ just in diagnostic text compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedOutcome {
    pub outcome: Outcome,
    #[serde(with = "nanos")]
    pub elapsed: Duration,
}

impl TimedOutcome {
    pub fn new(outcome: Outcome, elapsed: Duration) -> Self {
        Self { outcome, elapsed }
    }

    /// Elapsed nanoseconds, or [`UNDECIDED`] when the outcome is not solvable.
    pub fn decision_time(&self) -> i64 {
        if self.outcome.is_solvable() {
            i64::try_from(self.elapsed.as_nanos()).unwrap_or(i64::MAX)
        } else {
            UNDECIDED
        }
    }
}

impl PartialEq for TimedOutcome {
    fn eq(&self, other: &Self) -> bool {
        self.outcome.kind() == other.outcome.kind() && self.elapsed == other.elapsed
    }
}

impl Eq for TimedOutcome {}

mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_valid_and_invalid_are_solvable() {
        assert!(Outcome::Valid(None).is_solvable());
        assert!(Outcome::Invalid(None).is_solvable());
        assert!(!Outcome::Unknown(None).is_solvable());
        assert!(!Outcome::Timeout(None).is_solvable());
        assert!(!Outcome::Error(Some("boom".into())).is_solvable());
    }

    #[test]
    fn timed_outcome_equality_ignores_message() {
        let a = TimedOutcome::new(Outcome::Valid(Some("run 1".into())), Duration::from_nanos(42));
        let b = TimedOutcome::new(Outcome::Valid(Some("run 2".into())), Duration::from_nanos(42));
        let c = TimedOutcome::new(Outcome::Valid(None), Duration::from_nanos(43));
        let d = TimedOutcome::new(Outcome::Invalid(None), Duration::from_nanos(42));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn decision_time_uses_sentinel_for_undecided() {
        let timeout = TimedOutcome::new(Outcome::Timeout(None), Duration::from_secs(20));
        assert_eq!(timeout.decision_time(), UNDECIDED);

        let decided = TimedOutcome::new(Outcome::Invalid(None), Duration::from_nanos(1_500));
        assert_eq!(decided.decision_time(), 1_500);
    }

    #[test]
    fn serializes_with_tag_and_nanos() {
        let t = TimedOutcome::new(Outcome::Unknown(Some("why".into())), Duration::from_nanos(7));
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(
            json,
            r#"{"outcome":{"outcome":"unknown","message":"why"},"elapsed":7}"#
        );
    }
}

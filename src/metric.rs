use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Why a single action failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NetworkError,
    Timeout,
    ProtocolError,
}

impl FailureKind {
    pub const ALL: [FailureKind; 3] = [Self::NetworkError, Self::Timeout, Self::ProtocolError];
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
        };
        f.write_str(s)
    }
}

/// Result of one completed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure(FailureKind),
}

/// A `MetricsRecord` is the smallest unit of measurement: one completed action.
///
/// Records are produced by virtual users, written once and folded into a
/// [`crate::aggregate::LatencyAggregate`] by the [`crate::sink::MetricsSink`].
/// They are never mutated after creation.
///
/// - `timestamp` is the offset from the start of the run at which the action began.
/// - `duration` is the wall-clock time the action took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: Duration,
    pub duration: Duration,
    pub outcome: Outcome,
}

impl MetricsRecord {
    pub fn new(timestamp: Duration, duration: Duration, outcome: Outcome) -> Self {
        Self {
            timestamp,
            duration,
            outcome,
        }
    }

    pub fn success(timestamp: Duration, duration: Duration) -> Self {
        Self::new(timestamp, duration, Outcome::Success)
    }

    pub fn failure(timestamp: Duration, duration: Duration, kind: FailureKind) -> Self {
        Self::new(timestamp, duration, Outcome::Failure(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kind_display_is_snake_case() {
        let names: Vec<String> = FailureKind::ALL.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, ["network_error", "timeout", "protocol_error"]);
    }

    #[test]
    fn outcome_serializes_with_kind() {
        let json = serde_json::to_string(&Outcome::Failure(FailureKind::Timeout)).unwrap();
        assert_eq!(json, r#"{"failure":"timeout"}"#);
        assert_eq!(serde_json::to_string(&Outcome::Success).unwrap(), r#""success""#);
    }
}

use std::{path::PathBuf, time::Duration};

use crate::metric::FailureKind;

/// Errors raised while building or validating a test plan.
///
/// These are the only errors fatal to a run, and they are always raised
/// before any virtual user starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("test plan must contain at least one stage")]
    EmptyPlan,

    #[error("total duration of the test plan overflows")]
    PlanTooLong,

    #[error("stage {stage} has a negative target ({target})")]
    NegativeTarget { stage: usize, target: i64 },

    #[error("invalid duration '{value}' for {field}: {source}")]
    InvalidDuration {
        field: String,
        value: String,
        source: humantime::DurationError,
    },

    #[error("tick interval must be greater than zero")]
    ZeroTick,

    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("failed to read test plan '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML test plan: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON test plan: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure of a single action. Recorded as a metric, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("network error: {0}")]
    Network(String),

    #[error("action timed out")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ActionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network(_) => FailureKind::NetworkError,
            Self::Timeout => FailureKind::Timeout,
            Self::Protocol(_) => FailureKind::ProtocolError,
        }
    }
}

/// A virtual user did not drain within the grace timeout and was force-terminated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("virtual user {vu} did not stop within {grace:?}, force-terminated")]
pub struct DrainTimeoutError {
    pub vu: u64,
    pub grace: Duration,
}

/// A reporter failed to deliver a progress update or the final report.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Top level error returned by an [`crate::Executor`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_error_maps_to_failure_kind() {
        assert_eq!(
            ActionError::Network("refused".into()).kind(),
            FailureKind::NetworkError
        );
        assert_eq!(ActionError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(
            ActionError::Protocol("HTTP 503".into()).kind(),
            FailureKind::ProtocolError
        );
    }

    #[test]
    fn drain_timeout_message_names_the_vu() {
        let err = DrainTimeoutError {
            vu: 7,
            grace: Duration::from_secs(2),
        };
        assert_eq!(
            err.to_string(),
            "virtual user 7 did not stop within 2s, force-terminated"
        );
    }

    #[test]
    fn config_error_converts_into_executor_error() {
        let err: Error = ConfigError::EmptyPlan.into();
        assert!(matches!(err, Error::Config(ConfigError::EmptyPlan)));
    }
}

//! Error taxonomy for the linkage pipeline.
//!
//! Configuration and expression problems surface as [`ValidationError`]
//! before any pairwise work starts. [`ExecError`] covers everything a
//! run can fail with afterwards: cancellation, deadline overrun, or an
//! internal invariant violation (a planner/engine bug, never user data).

use linkage_dsl::MetricV1ParseError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error(transparent)]
    Parse(#[from] MetricV1ParseError),

    #[error("unknown measure `{measure}` in `{fragment}`")]
    UnknownMeasure { measure: String, fragment: String },

    /// A property is only rejected when neither collection carries it.
    /// A property present on one side still evaluates (missing values
    /// score nothing and are reported as data-quality warnings).
    #[error("property `{property}` is absent from both collections (in `{fragment}`)")]
    UnknownProperty { property: String, fragment: String },

    #[error("acceptance threshold {0} out of range [0, 1]")]
    AcceptanceOutOfRange(f64),

    #[error("unknown {kind} variant `{name}`")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("granularity must be at least 1")]
    InvalidGranularity,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("run cancelled after {elapsed_ms} ms")]
    Cancelled { elapsed_ms: u64 },

    #[error("run exceeded its {budget_ms} ms budget")]
    TimedOut { budget_ms: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecError {
    /// True for the two cooperative-stop outcomes. Partial results are
    /// discarded in both cases; callers distinguish them from failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecError::Cancelled { .. } | ExecError::TimedOut { .. })
    }
}

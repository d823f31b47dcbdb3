use crate::Frequency;
use thiserror::Error;

/// Errors raised while building or evaluating recurrences.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A rule field holds a value outside its RFC 5545 range.
    #[error("{field} value {value} is out of range, expected {expected}")]
    Validation {
        field: &'static str,
        value: i64,
        expected: &'static str,
    },

    #[error("INTERVAL must be a positive integer")]
    ZeroInterval,

    /// A rule field that RFC 5545 forbids for the rule's frequency.
    #[error("{field} cannot be used with FREQ={frequency}")]
    IncompatibleField {
        field: &'static str,
        frequency: Frequency,
    },

    #[error("BYSETPOS requires at least one other BYxxx rule part")]
    SetPosWithoutConstraint,

    /// The query window has no upper bound and a rule never ends.
    #[error("query is unbounded: supply an upper window bound or a COUNT/UNTIL rule")]
    UnboundedQuery,

    /// The empty period guard tripped before any candidate was found.
    #[error("gave up after scanning {periods} consecutive periods without an occurrence")]
    EvaluationLimitExceeded { periods: u64 },

    #[error("floating date-time {0} has no zone context to convert from")]
    FloatingConversion(chrono::NaiveDateTime),

    #[error("date arithmetic left the representable range")]
    DateOutOfRange,
}

pub type Result<T> = std::result::Result<T, Error>;

use chrono::NaiveDate;
use thiserror::Error;

/// Failures raised by the analytical pipeline.
///
/// Every error is raised at the call that detects it and aborts only that
/// computation; upstream series and sibling fits stay valid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EpiError {
    /// A report count was negative, fractional or not finite.
    #[error("invalid {column} count {value} on {date}")]
    InvalidCount {
        date: NaiveDate,
        column: &'static str,
        value: f64,
    },

    /// Fewer than two non-zero observations in a growth segment.
    #[error("growth segment from {start:?} has {found} non-zero observations, 2 required")]
    InsufficientData {
        start: Option<NaiveDate>,
        found: usize,
    },

    #[error("split date {split} outside series range {first}..={last}")]
    InvalidSplit {
        split: NaiveDate,
        first: NaiveDate,
        last: NaiveDate,
    },

    /// Conversion attempted on a segment that has no usable fit.
    #[error("cannot convert a degenerate growth fit: {reason}")]
    DegenerateFit { reason: String },

    #[error("{found} observations available, at least {required} required")]
    InsufficientHistory { required: usize, found: usize },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl EpiError {
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        EpiError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type EpiResult<T> = Result<T, EpiError>;

/// Checks that `value` is finite and strictly positive.
pub(crate) fn ensure_positive(name: &'static str, value: f64) -> EpiResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(EpiError::invalid_parameter(
            name,
            format!("must be positive and finite, got {value}"),
        ))
    }
}

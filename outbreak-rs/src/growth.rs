//! Log-linear growth fits on incidence segments.
//!
//! A segment is fit by ordinary least squares of `ln(count)` against the day
//! offset from the segment's first bucket. Buckets with a zero count are left
//! out since their log is undefined.
use std::fmt;

use chrono::{Duration, NaiveDate};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::{
    error::{EpiError, EpiResult},
    incidence::IncidenceSeries,
};

/// Least-squares fit of one segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrowthFit {
    /// Date of day offset zero.
    pub origin: NaiveDate,
    pub intercept: f64,
    /// Daily growth rate `r`.
    pub slope: f64,
    pub slope_std_error: f64,
    pub r_squared: f64,
    pub n_observations_used: usize,
}

/// Reading of the fitted slope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trend {
    Doubling(f64),
    Halving(f64),
    Flat,
}

impl GrowthFit {
    /// Residual degrees of freedom.
    pub fn degrees_of_freedom(&self) -> usize {
        self.n_observations_used.saturating_sub(2)
    }

    pub fn doubling_time(&self) -> Option<f64> {
        (self.slope > 0.0).then(|| std::f64::consts::LN_2 / self.slope)
    }

    pub fn halving_time(&self) -> Option<f64> {
        (self.slope < 0.0).then(|| std::f64::consts::LN_2 / -self.slope)
    }

    pub fn trend(&self) -> Trend {
        match (self.doubling_time(), self.halving_time()) {
            (Some(days), _) => Trend::Doubling(days),
            (_, Some(days)) => Trend::Halving(days),
            _ => Trend::Flat,
        }
    }

    /// Two-sided Student-t confidence interval of the slope.
    pub fn slope_interval(&self, level: f64) -> (f64, f64) {
        let df = self.degrees_of_freedom();
        if df == 0 || self.slope_std_error == 0.0 {
            return (self.slope, self.slope);
        }
        let t = match StudentsT::new(0.0, 1.0, df as f64) {
            Ok(dist) => dist.inverse_cdf(0.5 + level / 2.0),
            Err(_) => return (self.slope, self.slope),
        };
        let half = t * self.slope_std_error;
        (self.slope - half, self.slope + half)
    }

    /// Doubling (or halving) time bounds implied by the slope interval.
    /// `None` when the interval straddles zero.
    pub fn time_interval(&self, level: f64) -> Option<(f64, f64)> {
        let (lo, hi) = self.slope_interval(level);
        let ln2 = std::f64::consts::LN_2;
        if lo > 0.0 {
            Some((ln2 / hi, ln2 / lo))
        } else if hi < 0.0 {
            Some((ln2 / -lo, ln2 / -hi))
        } else {
            None
        }
    }

    /// Fitted incidence on `date`.
    pub fn predict(&self, date: NaiveDate) -> f64 {
        let t = (date - self.origin).num_days() as f64;
        (self.intercept + self.slope * t).exp()
    }
}

impl fmt::Display for GrowthFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "r = {:.4} (se {:.4}), R² = {:.3}, n = {}",
            self.slope, self.slope_std_error, self.r_squared, self.n_observations_used
        )?;
        match self.trend() {
            Trend::Doubling(days) => write!(f, ", doubling time {days:.2} days"),
            Trend::Halving(days) => write!(f, ", halving time {days:.2} days"),
            Trend::Flat => write!(f, ", flat"),
        }
    }
}

/// Outcome of one side of a split fit.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentFit {
    Fitted(GrowthFit),
    Failed(EpiError),
}

impl SegmentFit {
    pub fn is_fitted(&self) -> bool {
        matches!(self, SegmentFit::Fitted(_))
    }

    /// The fit, or [`EpiError::DegenerateFit`] if the segment never fit.
    pub fn fit(&self) -> EpiResult<&GrowthFit> {
        match self {
            SegmentFit::Fitted(fit) => Ok(fit),
            SegmentFit::Failed(err) => Err(EpiError::DegenerateFit {
                reason: err.to_string(),
            }),
        }
    }
}

impl From<EpiResult<GrowthFit>> for SegmentFit {
    fn from(result: EpiResult<GrowthFit>) -> Self {
        match result {
            Ok(fit) => SegmentFit::Fitted(fit),
            Err(err) => SegmentFit::Failed(err),
        }
    }
}

/// Two independent fits on `[start, split)` and `[split, end]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitFit {
    pub split: NaiveDate,
    pub before: SegmentFit,
    pub after: SegmentFit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IncidenceFit {
    Single(GrowthFit),
    Split(SplitFit),
}

/// Fits the whole series.
pub fn fit(series: &IncidenceSeries) -> EpiResult<GrowthFit> {
    let Some(origin) = series.first_date() else {
        return Err(EpiError::InsufficientData {
            start: None,
            found: 0,
        });
    };

    let (x, y): (Vec<f64>, Vec<f64>) = series
        .dates()
        .iter()
        .zip(series.counts())
        .filter(|(_, count)| **count > 0)
        .map(|(date, count)| ((*date - origin).num_days() as f64, (*count as f64).ln()))
        .unzip();
    let n = x.len();
    if n < 2 {
        return Err(EpiError::InsufficientData {
            start: Some(origin),
            found: n,
        });
    }

    let design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { x[i] });
    let response = DVector::from_vec(y);
    let gram_inv = (design.transpose() * &design)
        .try_inverse()
        .ok_or_else(|| EpiError::InsufficientData {
            start: Some(origin),
            found: n,
        })?;
    let beta = &gram_inv * design.transpose() * &response;
    let residuals = &response - &design * &beta;
    let rss = residuals.norm_squared();
    let mean = response.mean();
    let tss: f64 = response.iter().map(|v| (v - mean).powi(2)).sum();

    let df = n - 2;
    let sigma2 = if df > 0 { rss / df as f64 } else { 0.0 };
    let fit = GrowthFit {
        origin,
        intercept: beta[0],
        slope: beta[1],
        slope_std_error: (sigma2 * gram_inv[(1, 1)]).sqrt(),
        r_squared: if tss > 0.0 { 1.0 - rss / tss } else { 1.0 },
        n_observations_used: n,
    };
    debug!("growth fit from {}: {}", origin, fit);
    Ok(fit)
}

/// Fits `[first, split)` and `[split, last]` independently. A failure on one
/// side is kept in that side's [`SegmentFit`] and does not affect the other.
pub fn fit_split(series: &IncidenceSeries, split: NaiveDate) -> EpiResult<SplitFit> {
    let (Some(first), Some(last)) = (series.first_date(), series.last_date()) else {
        return Err(EpiError::InsufficientData {
            start: None,
            found: 0,
        });
    };
    if split < first || split > last {
        return Err(EpiError::InvalidSplit { split, first, last });
    }

    let before: SegmentFit = fit(&series.slice(first, split - Duration::days(1))).into();
    let after: SegmentFit = fit(&series.slice(split, last)).into();
    for (side, segment) in [("before", &before), ("after", &after)] {
        if let SegmentFit::Failed(err) = segment {
            warn!("{side} segment of split at {split} did not fit: {err}");
        }
    }
    Ok(SplitFit {
        split,
        before,
        after,
    })
}

/// Fits the series, split at `split` when given.
pub fn fit_growth(series: &IncidenceSeries, split: Option<NaiveDate>) -> EpiResult<IncidenceFit> {
    match split {
        Some(date) => fit_split(series, date).map(IncidenceFit::Split),
        None => fit(series).map(IncidenceFit::Single),
    }
}

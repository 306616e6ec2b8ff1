//! Growth rate to reproduction number.
//!
//! A growth rate `r` maps to `R = 1 / Σ pmf(lag) · exp(-r · lag)`, the
//! discrete Euler-Lotka relation for the serial interval. Uncertainty in the
//! fitted slope is propagated by drawing `r` from its sampling distribution.
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, StudentT};
use serde::Serialize;

use crate::{
    error::{EpiError, EpiResult},
    growth::{GrowthFit, SegmentFit},
    serial_interval::SerialInterval,
    stats::{self, Histogram, Summary},
};

/// Draws from the sampling distribution of a reproduction number.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RSample {
    draws: Vec<f64>,
}

impl RSample {
    pub fn from_draws(draws: Vec<f64>) -> Self {
        RSample { draws }
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn draws(&self) -> &[f64] {
        &self.draws
    }

    pub fn mean(&self) -> f64 {
        stats::mean(&self.draws)
    }

    pub fn median(&self) -> f64 {
        self.quantile(0.5)
    }

    pub fn quantile(&self, p: f64) -> f64 {
        stats::quantile(&stats::sorted(&self.draws), p)
    }

    pub fn summary(&self) -> Summary {
        Summary::of(&self.draws)
    }

    pub fn histogram(&self, bins: usize) -> Histogram {
        Histogram::of(&self.draws, bins)
    }
}

/// Reproduction number implied by a daily growth rate.
pub fn r_from_growth(r: f64, si: &SerialInterval) -> f64 {
    1.0 / si.discounted_mass(r)
}

/// Samples `n_draws` reproduction numbers from a fitted segment.
///
/// The slope is drawn from `slope + se · t(df)`; with no residual degrees of
/// freedom the slope is used as is.
pub fn sample_r<R: Rng + ?Sized>(
    fit: &GrowthFit,
    si: &SerialInterval,
    n_draws: usize,
    rng: &mut R,
) -> EpiResult<RSample> {
    if n_draws == 0 {
        return Err(EpiError::invalid_parameter(
            "r_draws",
            "must be at least 1",
        ));
    }
    if !fit.slope.is_finite() || !fit.slope_std_error.is_finite() {
        return Err(EpiError::DegenerateFit {
            reason: format!(
                "slope {} with standard error {}",
                fit.slope, fit.slope_std_error
            ),
        });
    }

    let df = fit.degrees_of_freedom();
    let noise = if df > 0 && fit.slope_std_error > 0.0 {
        Some(StudentT::new(df as f64).map_err(|e| EpiError::DegenerateFit {
            reason: e.to_string(),
        })?)
    } else {
        None
    };

    let mut draws = Vec::with_capacity(n_draws);
    for _ in 0..n_draws {
        let r = match &noise {
            Some(t) => fit.slope + fit.slope_std_error * t.sample(rng),
            None => fit.slope,
        };
        draws.push(r_from_growth(r, si));
    }
    let sample = RSample::from_draws(draws);
    debug!(
        "sampled {} R values from r = {:.4}: median {:.3}",
        n_draws,
        fit.slope,
        sample.median()
    );
    Ok(sample)
}

/// Like [`sample_r`], failing with [`EpiError::DegenerateFit`] when the
/// segment never fit.
pub fn sample_segment_r<R: Rng + ?Sized>(
    segment: &SegmentFit,
    si: &SerialInterval,
    n_draws: usize,
    rng: &mut R,
) -> EpiResult<RSample> {
    sample_r(segment.fit()?, si, n_draws, rng)
}

//! Discretised serial-interval distributions.
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Gamma, Normal};

use crate::error::{EpiError, EpiResult, ensure_positive};

/// Tail mass left out when the maximum lag is chosen automatically.
const TAIL_MASS: f64 = 1e-6;
/// Upper bound on an automatically chosen maximum lag, in intervals.
const MAX_LAG: usize = 365;

/// Probability mass over integer lags, in units of the incidence interval.
///
/// For a gamma-shaped interval with CDF `F` (in days), interval width `Δ`
/// and offset `w`:
///
/// - `pmf(lag) = 0` for `lag < w`
/// - `pmf(w) = F(w·Δ)`, all mass up to the offset
/// - `pmf(lag) = F(lag·Δ) - F((lag-1)·Δ)` for `lag > w`
///
/// then renormalised over `0..=max_lag`. Lag zero never carries mass when
/// `w = 0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerialInterval {
    interval: u32,
    offset: usize,
    pmf: Vec<f64>,
    gamma: Option<GammaShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GammaShape {
    pub shape: f64,
    pub scale: f64,
}

impl GammaShape {
    /// Shape `(μ/σ)²` and scale `σ²/μ`.
    pub fn from_mean_sd(mean: f64, sd: f64) -> EpiResult<Self> {
        ensure_positive("mean_si", mean)?;
        ensure_positive("std_si", sd)?;
        Ok(GammaShape {
            shape: (mean / sd).powi(2),
            scale: sd * sd / mean,
        })
    }
}

impl SerialInterval {
    /// Gamma serial interval with the maximum lag chosen so that at most
    /// `1e-6` of the mass is cut off.
    pub fn gamma(mean: f64, sd: f64, interval: u32, offset: usize) -> EpiResult<Self> {
        Self::build_gamma(mean, sd, interval, offset, None)
    }

    pub fn gamma_with_max_lag(
        mean: f64,
        sd: f64,
        interval: u32,
        offset: usize,
        max_lag: usize,
    ) -> EpiResult<Self> {
        Self::build_gamma(mean, sd, interval, offset, Some(max_lag))
    }

    /// Gamma serial interval from its mean and coefficient of variation.
    pub fn from_mean_cv(mean: f64, cv: f64, interval: u32, offset: usize) -> EpiResult<Self> {
        ensure_positive("cv_si", cv)?;
        Self::gamma(mean, mean * cv, interval, offset)
    }

    fn build_gamma(
        mean: f64,
        sd: f64,
        interval: u32,
        offset: usize,
        max_lag: Option<usize>,
    ) -> EpiResult<Self> {
        if interval == 0 {
            return Err(EpiError::invalid_parameter(
                "interval",
                "must be at least one day",
            ));
        }
        let params = GammaShape::from_mean_sd(mean, sd)?;
        let dist = Gamma::new(params.shape, 1.0 / params.scale)
            .map_err(|e| EpiError::invalid_parameter("std_si", e.to_string()))?;
        let width = interval as f64;
        let cdf = |lag: usize| dist.cdf(lag as f64 * width);

        let max_lag = match max_lag {
            Some(lag) if lag < offset.max(1) => {
                return Err(EpiError::invalid_parameter(
                    "max_lag",
                    format!("must be at least {}, got {lag}", offset.max(1)),
                ));
            }
            Some(lag) => lag,
            None => (offset.max(1)..=MAX_LAG.max(offset))
                .find(|&lag| 1.0 - cdf(lag) < TAIL_MASS)
                .unwrap_or(MAX_LAG.max(offset)),
        };

        let mut pmf = vec![0.0; max_lag + 1];
        pmf[offset] = cdf(offset);
        for lag in offset + 1..=max_lag {
            pmf[lag] = cdf(lag) - cdf(lag - 1);
        }
        let si = Self::normalised(interval, offset, pmf, Some(params))?;
        debug!(
            "serial interval: mean {mean}, sd {sd}, shape {:.3}, scale {:.3}, max lag {max_lag}",
            params.shape, params.scale
        );
        Ok(si)
    }

    /// Serial interval from explicit masses for lags `1, 2, ..`.
    pub fn from_pmf(masses: &[f64], interval: u32) -> EpiResult<Self> {
        if interval == 0 {
            return Err(EpiError::invalid_parameter(
                "interval",
                "must be at least one day",
            ));
        }
        if masses.iter().any(|m| !m.is_finite() || *m < 0.0) {
            return Err(EpiError::invalid_parameter(
                "serial_interval_pmf",
                "masses must be finite and non-negative",
            ));
        }
        let mut pmf = Vec::with_capacity(masses.len() + 1);
        pmf.push(0.0);
        pmf.extend_from_slice(masses);
        let offset = pmf.iter().position(|m| *m > 0.0).unwrap_or(1);
        Self::normalised(interval, offset, pmf, None)
    }

    fn normalised(
        interval: u32,
        offset: usize,
        mut pmf: Vec<f64>,
        gamma: Option<GammaShape>,
    ) -> EpiResult<Self> {
        let total: f64 = pmf.iter().sum();
        if !(total > 0.0) {
            return Err(EpiError::invalid_parameter(
                "serial_interval_pmf",
                "distribution has no mass",
            ));
        }
        pmf.iter_mut().for_each(|m| *m /= total);
        Ok(SerialInterval {
            interval,
            offset,
            pmf,
            gamma,
        })
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn max_lag(&self) -> usize {
        self.pmf.len() - 1
    }

    /// Gamma parameters, when the distribution was built from them.
    pub fn gamma_shape(&self) -> Option<GammaShape> {
        self.gamma
    }

    pub fn pmf(&self, lag: usize) -> f64 {
        self.pmf.get(lag).copied().unwrap_or(0.0)
    }

    /// Masses indexed by lag, starting at lag zero.
    pub fn masses(&self) -> &[f64] {
        &self.pmf
    }

    /// Mean of the discretised distribution, in days.
    pub fn mean(&self) -> f64 {
        let width = self.interval as f64;
        self.pmf
            .iter()
            .enumerate()
            .map(|(lag, m)| lag as f64 * width * m)
            .sum()
    }

    /// Standard deviation of the discretised distribution, in days.
    pub fn sd(&self) -> f64 {
        let width = self.interval as f64;
        let mean = self.mean();
        self.pmf
            .iter()
            .enumerate()
            .map(|(lag, m)| (lag as f64 * width - mean).powi(2) * m)
            .sum::<f64>()
            .sqrt()
    }

    /// `Σ pmf(lag) · exp(-r · lag · Δ)` for a daily growth rate `r`.
    pub fn discounted_mass(&self, r: f64) -> f64 {
        let width = self.interval as f64;
        self.pmf
            .iter()
            .enumerate()
            .map(|(lag, m)| m * (-r * lag as f64 * width).exp())
            .sum()
    }

    /// Renewal-equation infection pressure at bucket `t`:
    /// `Σ_{lag ≥ 1} pmf(lag) · incidence[t - lag]`, ignoring lags that reach
    /// before the start of `incidence`.
    pub fn pressure(&self, incidence: &[u64], t: usize) -> f64 {
        let upto = self.max_lag().min(t);
        (1..=upto)
            .map(|lag| self.pmf[lag] * incidence[t - lag] as f64)
            .sum()
    }
}

/// Uncertain serial interval: `(mean, sd)` drawn from normals truncated to
/// `[min, max]`, `n1` draws, each followed by `n2` draws of R.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertainSi {
    pub mean_si: f64,
    pub std_mean_si: f64,
    pub min_mean_si: f64,
    pub max_mean_si: f64,
    pub std_si: f64,
    pub std_std_si: f64,
    pub min_std_si: f64,
    pub max_std_si: f64,
    pub n1: usize,
    pub n2: usize,
}

impl UncertainSi {
    pub fn validate(&self) -> EpiResult<()> {
        ensure_positive("mean_si", self.mean_si)?;
        ensure_positive("std_si", self.std_si)?;
        ensure_positive("min_mean_si", self.min_mean_si)?;
        ensure_positive("min_std_si", self.min_std_si)?;
        for (name, value) in [
            ("std_mean_si", self.std_mean_si),
            ("std_std_si", self.std_std_si),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(EpiError::invalid_parameter(
                    name,
                    format!("must be non-negative, got {value}"),
                ));
            }
        }
        if self.min_mean_si > self.max_mean_si {
            return Err(EpiError::invalid_parameter(
                "min_mean_si",
                format!("{} exceeds max_mean_si {}", self.min_mean_si, self.max_mean_si),
            ));
        }
        if self.min_std_si > self.max_std_si {
            return Err(EpiError::invalid_parameter(
                "min_std_si",
                format!("{} exceeds max_std_si {}", self.min_std_si, self.max_std_si),
            ));
        }
        if self.n1 == 0 || self.n2 == 0 {
            return Err(EpiError::invalid_parameter(
                "n1",
                "n1 and n2 must both be at least 1",
            ));
        }
        Ok(())
    }

    /// Draws one `(mean, sd)` pair.
    pub fn draw_moments<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        let mean = truncated_normal(
            rng,
            self.mean_si,
            self.std_mean_si,
            self.min_mean_si,
            self.max_mean_si,
        );
        let sd = truncated_normal(
            rng,
            self.std_si,
            self.std_std_si,
            self.min_std_si,
            self.max_std_si,
        );
        (mean, sd)
    }

    /// Draws a fresh serial interval.
    pub fn draw<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        interval: u32,
        offset: usize,
    ) -> EpiResult<SerialInterval> {
        let (mean, sd) = self.draw_moments(rng);
        SerialInterval::gamma(mean, sd, interval, offset)
    }
}

/// Inverse-CDF draw from `Normal(mean, sd)` restricted to `[lo, hi]`.
pub fn truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    mean: f64,
    sd: f64,
    lo: f64,
    hi: f64,
) -> f64 {
    let Ok(standard) = Normal::new(0.0, 1.0) else {
        return mean.clamp(lo, hi);
    };
    if sd <= 0.0 || lo >= hi {
        return mean.clamp(lo, hi);
    }
    let p_lo = standard.cdf((lo - mean) / sd);
    let p_hi = standard.cdf((hi - mean) / sd);
    if p_hi - p_lo <= f64::EPSILON {
        // All the mass sits beyond one bound.
        return if p_hi <= 0.5 { hi } else { lo };
    }
    let u: f64 = rng.random();
    let z = standard.inverse_cdf(p_lo + u * (p_hi - p_lo));
    (mean + sd * z).clamp(lo, hi)
}

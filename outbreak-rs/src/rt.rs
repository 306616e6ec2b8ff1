//! Time-varying reproduction number over sliding windows.
//!
//! Within a window `[s, e]` incidence is Poisson with mean `R · Λ_t`, where
//! `Λ_t = Σ pmf(lag) · I_{t-lag}` is the infection pressure from earlier
//! cases. A `Gamma(a, b)` prior on R then gives the conjugate posterior
//! `Gamma(a + Σ I_t, 1 / (1/b + Σ Λ_t))` (shape, scale).
use chrono::NaiveDate;
use log::{debug, warn};
use rand::Rng;
use rand_distr::{Distribution, Gamma as GammaSampler};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Gamma};

use crate::{
    error::{EpiError, EpiResult, ensure_positive},
    incidence::IncidenceSeries,
    serial_interval::{GammaShape, SerialInterval, UncertainSi},
    stats::Summary,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Window length, in buckets.
    pub window: usize,
    /// Distance between consecutive window starts.
    pub step: usize,
    pub prior_mean: f64,
    pub prior_std: f64,
}

impl Default for RtConfig {
    fn default() -> Self {
        RtConfig {
            window: 7,
            step: 1,
            prior_mean: 5.0,
            prior_std: 5.0,
        }
    }
}

impl RtConfig {
    pub fn validate(&self) -> EpiResult<()> {
        if self.window == 0 {
            return Err(EpiError::invalid_parameter("window", "must be at least 1"));
        }
        if self.step == 0 {
            return Err(EpiError::invalid_parameter("step", "must be at least 1"));
        }
        ensure_positive("prior_mean", self.prior_mean)?;
        ensure_positive("prior_std", self.prior_std)
    }

    fn prior(&self) -> EpiResult<GammaShape> {
        GammaShape::from_mean_sd(self.prior_mean, self.prior_std)
    }
}

/// Estimate for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RtWindow {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub mean_r: f64,
    pub std_r: f64,
    pub quantile_0_025_r: f64,
    pub median_r: f64,
    pub quantile_0_975_r: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RTimeSeries {
    windows: Vec<RtWindow>,
}

impl RTimeSeries {
    pub fn windows(&self) -> &[RtWindow] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// The most recent window.
    pub fn latest(&self) -> Option<&RtWindow> {
        self.windows.last()
    }
}

/// Bucket index ranges `(start, end)` of every window. The first window
/// starts at the second bucket, since the first has no earlier cases.
fn window_bounds(len: usize, config: &RtConfig) -> EpiResult<Vec<(usize, usize)>> {
    config.validate()?;
    if len < config.window + 1 {
        return Err(EpiError::InsufficientHistory {
            required: config.window + 1,
            found: len,
        });
    }
    Ok((1..=len - config.window)
        .step_by(config.step)
        .map(|start| (start, start + config.window - 1))
        .collect())
}

fn check_interval(series: &IncidenceSeries, si: &SerialInterval) -> EpiResult<()> {
    if series.interval() != si.interval() {
        return Err(EpiError::invalid_parameter(
            "interval",
            format!(
                "serial interval uses {}-day lags but incidence has {}-day buckets",
                si.interval(),
                series.interval()
            ),
        ));
    }
    Ok(())
}

/// Posterior shape and scale of R over buckets `start..=end`.
pub fn window_posterior(
    series: &IncidenceSeries,
    si: &SerialInterval,
    prior: GammaShape,
    start: usize,
    end: usize,
) -> EpiResult<GammaShape> {
    let counts = series.counts();
    if start > end || end >= counts.len() {
        return Err(EpiError::invalid_parameter(
            "window",
            format!(
                "window {start}..={end} does not fit a series of {} buckets",
                counts.len()
            ),
        ));
    }
    let cases: u64 = counts[start..=end].iter().sum();
    let pressure: f64 = (start..=end).map(|t| si.pressure(counts, t)).sum();
    if pressure == 0.0 {
        warn!(
            "no infection pressure in window {}..={}, posterior equals prior",
            start, end
        );
    }
    Ok(GammaShape {
        shape: prior.shape + cases as f64,
        scale: 1.0 / (1.0 / prior.scale + pressure),
    })
}

fn summarise_posterior(posterior: GammaShape) -> EpiResult<(f64, f64, f64, f64, f64)> {
    let dist = Gamma::new(posterior.shape, 1.0 / posterior.scale)
        .map_err(|e| EpiError::invalid_parameter("prior", e.to_string()))?;
    Ok((
        posterior.shape * posterior.scale,
        posterior.shape.sqrt() * posterior.scale,
        dist.inverse_cdf(0.025),
        dist.inverse_cdf(0.5),
        dist.inverse_cdf(0.975),
    ))
}

/// Windowed estimate with a fixed serial interval.
pub fn estimate_rt(
    series: &IncidenceSeries,
    si: &SerialInterval,
    config: &RtConfig,
) -> EpiResult<RTimeSeries> {
    check_interval(series, si)?;
    let bounds = window_bounds(series.len(), config)?;
    let prior = config.prior()?;
    let dates = series.dates();

    let mut windows = Vec::with_capacity(bounds.len());
    for (start, end) in bounds {
        let posterior = window_posterior(series, si, prior, start, end)?;
        let (mean_r, std_r, lo, median, hi) = summarise_posterior(posterior)?;
        windows.push(RtWindow {
            window_start: dates[start],
            window_end: dates[end],
            mean_r,
            std_r,
            quantile_0_025_r: lo,
            median_r: median,
            quantile_0_975_r: hi,
        });
    }
    debug!("estimated R over {} windows of {}", windows.len(), config.window);
    Ok(RTimeSeries { windows })
}

/// Windowed estimate integrating over serial-interval uncertainty: `n1`
/// serial intervals are drawn, `n2` posterior draws of R are taken under
/// each, and the pooled draws are summarised per window.
pub fn estimate_rt_uncertain<R: Rng + ?Sized>(
    series: &IncidenceSeries,
    uncertain: &UncertainSi,
    offset: usize,
    config: &RtConfig,
    rng: &mut R,
) -> EpiResult<RTimeSeries> {
    uncertain.validate()?;
    let bounds = window_bounds(series.len(), config)?;
    let prior = config.prior()?;
    let dates = series.dates();

    let mut pooled: Vec<Vec<f64>> = (0..bounds.len())
        .map(|_| Vec::with_capacity(uncertain.n1 * uncertain.n2))
        .collect();
    for _ in 0..uncertain.n1 {
        let si = uncertain.draw(rng, series.interval(), offset)?;
        for (draws, &(start, end)) in pooled.iter_mut().zip(&bounds) {
            let posterior = window_posterior(series, &si, prior, start, end)?;
            let sampler = GammaSampler::new(posterior.shape, posterior.scale)
                .map_err(|e| EpiError::invalid_parameter("prior", e.to_string()))?;
            for _ in 0..uncertain.n2 {
                draws.push(sampler.sample(rng));
            }
        }
    }

    let windows = bounds
        .iter()
        .zip(&pooled)
        .map(|(&(start, end), draws)| {
            let summary = Summary::of(draws);
            RtWindow {
                window_start: dates[start],
                window_end: dates[end],
                mean_r: summary.mean,
                std_r: summary.std,
                quantile_0_025_r: summary.q025,
                median_r: summary.median,
                quantile_0_975_r: summary.q975,
            }
        })
        .collect::<Vec<_>>();
    debug!(
        "estimated R over {} windows from {} x {} draws",
        windows.len(),
        uncertain.n1,
        uncertain.n2
    );
    Ok(RTimeSeries { windows })
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use rand::{SeedableRng, rngs::StdRng};

    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 2, 24).unwrap()
    }

    fn series(counts: Vec<u64>) -> IncidenceSeries {
        IncidenceSeries::from_counts(start(), 1, counts).unwrap()
    }

    fn uncertain() -> UncertainSi {
        UncertainSi {
            mean_si: 5.2,
            std_mean_si: 0.5,
            min_mean_si: 4.0,
            max_mean_si: 6.5,
            std_si: 2.8,
            std_std_si: 0.3,
            min_std_si: 2.0,
            max_std_si: 3.5,
            n1: 30,
            n2: 30,
        }
    }

    #[test]
    fn test_window_layout() {
        let s = series(vec![10; 20]);
        let si = SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap();
        let rt = estimate_rt(&s, &si, &RtConfig::default()).unwrap();
        assert_eq!(rt.len(), 13);
        let first = rt.windows()[0];
        assert_eq!(first.window_start, start() + Duration::days(1));
        assert_eq!(first.window_end, start() + Duration::days(7));
        assert_eq!(rt.latest().unwrap().window_end, start() + Duration::days(19));
    }

    #[test]
    fn test_insufficient_history() {
        let si = SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap();
        assert!(matches!(
            estimate_rt(&series(vec![5; 7]), &si, &RtConfig::default()),
            Err(EpiError::InsufficientHistory {
                required: 8,
                found: 7
            })
        ));
        assert!(estimate_rt(&series(vec![5; 8]), &si, &RtConfig::default()).is_ok());
    }

    #[test]
    fn test_constant_incidence_tends_to_one() {
        let s = series(vec![200; 80]);
        let si = SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap();
        let rt = estimate_rt(&s, &si, &RtConfig::default()).unwrap();
        let last = rt.latest().unwrap();
        assert!(f64::abs(last.mean_r - 1.0) < 0.02, "{last:?}");
        assert!(last.quantile_0_025_r < last.median_r && last.median_r < last.quantile_0_975_r);
    }

    #[test]
    fn test_growing_incidence_above_one() {
        let counts: Vec<u64> = (0..40)
            .map(|t| (5.0 * (0.1 * t as f64).exp()) as u64)
            .collect();
        let s = series(counts);
        let si = SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap();
        let rt = estimate_rt(&s, &si, &RtConfig::default()).unwrap();
        let expected = crate::convert::r_from_growth(0.1, &si);
        let last = rt.latest().unwrap();
        let relative = f64::abs(last.mean_r - expected) / expected;
        assert!(relative < 0.1, "{last:?} vs {expected}");
    }

    #[test]
    fn test_posterior_is_conjugate_update() {
        let s = series(vec![0, 4, 0, 0]);
        let si = SerialInterval::from_pmf(&[1.0], 1).unwrap();
        let prior = GammaShape {
            shape: 1.0,
            scale: 5.0,
        };
        // Window 2..=3: cases 0, pressure I_1 + I_2 = 4.
        let posterior = window_posterior(&s, &si, prior, 2, 3).unwrap();
        assert_eq!(posterior.shape, 1.0);
        assert!(f64::abs(posterior.scale - 1.0 / (0.2 + 4.0)) < 1e-12);
    }

    #[test]
    fn test_posterior_window_out_of_range() {
        let s = series(vec![0, 4, 0, 0]);
        let si = SerialInterval::from_pmf(&[1.0], 1).unwrap();
        let prior = GammaShape {
            shape: 1.0,
            scale: 5.0,
        };
        for (start, end) in [(2, 4), (3, 2), (10, 12)] {
            assert!(matches!(
                window_posterior(&s, &si, prior, start, end),
                Err(EpiError::InvalidParameter { name: "window", .. })
            ));
        }
        assert!(window_posterior(&s, &si, prior, 0, 3).is_ok());
    }

    #[test]
    fn test_step() {
        let s = series(vec![10; 20]);
        let si = SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap();
        let config = RtConfig {
            step: 7,
            ..RtConfig::default()
        };
        let rt = estimate_rt(&s, &si, &config).unwrap();
        assert_eq!(rt.len(), 2);
    }

    #[test]
    fn test_interval_mismatch() {
        let s = series(vec![10; 20]);
        let si = SerialInterval::gamma(5.2, 2.8, 7, 0).unwrap();
        assert!(matches!(
            estimate_rt(&s, &si, &RtConfig::default()),
            Err(EpiError::InvalidParameter { name: "interval", .. })
        ));
    }

    #[test]
    fn test_uncertain_si() {
        let s = series(vec![200; 60]);
        let mut rng = StdRng::seed_from_u64(8675309);
        let config = RtConfig::default();
        let rt = estimate_rt_uncertain(&s, &uncertain(), 0, &config, &mut rng).unwrap();
        assert_eq!(rt.len(), 53);
        let last = rt.latest().unwrap();
        assert!(f64::abs(last.mean_r - 1.0) < 0.05, "{last:?}");
        assert!(last.std_r > 0.0);

        let mut rng = StdRng::seed_from_u64(8675309);
        let again = estimate_rt_uncertain(&s, &uncertain(), 0, &config, &mut rng).unwrap();
        assert_eq!(rt, again);
    }

    #[test]
    fn test_uncertain_si_inverted_bounds() {
        let mut config = uncertain();
        config.min_std_si = 4.0;
        let mut rng = StdRng::seed_from_u64(1);
        let s = series(vec![10; 20]);
        assert!(matches!(
            estimate_rt_uncertain(&s, &config, 0, &RtConfig::default(), &mut rng),
            Err(EpiError::InvalidParameter { name: "min_std_si", .. })
        ));
    }
}

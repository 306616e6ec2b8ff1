//! Branching-process projection of future incidence.
//!
//! Each simulation continues the observed series with the renewal equation:
//! the expected count on a future day is `R · Σ pmf(lag) · I(day - lag)`,
//! where `I` is the observed tail before the horizon and the simulation's own
//! draws within it. Realised counts are Poisson, or negative binomial when a
//! dispersion is configured.
use chrono::{Duration, NaiveDate};
use log::debug;
use nalgebra::DMatrix;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Gamma, Poisson};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    convert::RSample,
    error::{EpiError, EpiResult, ensure_positive},
    incidence::IncidenceSeries,
    serial_interval::SerialInterval,
    stats,
};

/// Reproduction number driving a projection.
#[derive(Debug, Clone, PartialEq)]
pub enum Reproduction {
    Fixed(f64),
    /// One value drawn per simulation.
    Sampled(RSample),
}

impl Reproduction {
    fn validate(&self) -> EpiResult<()> {
        let values = match self {
            Reproduction::Fixed(r) => std::slice::from_ref(r),
            Reproduction::Sampled(sample) => sample.draws(),
        };
        if values.is_empty() {
            return Err(EpiError::invalid_parameter(
                "reproduction",
                "R sample is empty",
            ));
        }
        if let Some(bad) = values.iter().find(|r| !r.is_finite() || **r < 0.0) {
            return Err(EpiError::invalid_parameter(
                "reproduction",
                format!("R must be finite and non-negative, got {bad}"),
            ));
        }
        Ok(())
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Reproduction::Fixed(r) => *r,
            Reproduction::Sampled(sample) => {
                let draws = sample.draws();
                draws[rng.random_range(0..draws.len())]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    pub n_days: usize,
    pub n_sim: usize,
    /// Negative-binomial dispersion `k`; Poisson when absent.
    pub dispersion: Option<f64>,
    pub seed: u64,
}

impl ProjectionConfig {
    pub fn validate(&self) -> EpiResult<()> {
        if self.n_days == 0 {
            return Err(EpiError::invalid_parameter("n_days", "must be at least 1"));
        }
        if self.n_sim == 0 {
            return Err(EpiError::invalid_parameter("n_sim", "must be at least 1"));
        }
        if let Some(k) = self.dispersion {
            ensure_positive("dispersion", k)?;
        }
        Ok(())
    }
}

/// Seed of the RNG stream for one simulation.
fn stream_seed(seed: u64, index: usize) -> u64 {
    // splitmix64 finaliser
    let mut z = seed ^ (index as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn draw_count<R: Rng + ?Sized>(mean: f64, dispersion: Option<f64>, rng: &mut R) -> EpiResult<u64> {
    let overflow = |e: rand_distr::PoissonError| {
        EpiError::invalid_parameter(
            "reproduction",
            format!("projected daily incidence {mean} cannot be sampled: {e}"),
        )
    };
    let mean = match dispersion {
        Some(k) if mean > 0.0 => Gamma::new(k, mean / k)
            .map_err(|e| EpiError::invalid_parameter("dispersion", e.to_string()))?
            .sample(rng),
        _ => mean,
    };
    if mean > 0.0 {
        // Poisson requires a positive rate
        Ok(Poisson::new(mean).map_err(overflow)?.sample(rng) as u64)
    } else {
        Ok(0)
    }
}

fn simulate_one(
    tail: &[u64],
    reproduction: &Reproduction,
    si: &SerialInterval,
    config: &ProjectionConfig,
    index: usize,
) -> EpiResult<Vec<u64>> {
    let mut rng = StdRng::seed_from_u64(stream_seed(config.seed, index));
    let r = reproduction.pick(&mut rng);
    let mut incidence = Vec::with_capacity(tail.len() + config.n_days);
    incidence.extend_from_slice(tail);
    // Running total of the projected counts; it must stay representable so
    // that the cumulative table cannot overflow.
    let mut total = 0u64;
    for step in tail.len()..tail.len() + config.n_days {
        let expected = r * si.pressure(&incidence, step);
        let count = draw_count(expected, config.dispersion, &mut rng)?;
        total = total.checked_add(count).ok_or_else(|| {
            EpiError::invalid_parameter(
                "reproduction",
                format!(
                    "simulation {index} exceeds {} cumulative cases after {} buckets with R = {r}",
                    u64::MAX,
                    step + 1 - tail.len()
                ),
            )
        })?;
        incidence.push(count);
    }
    Ok(incidence.split_off(tail.len()))
}

/// Runs `n_sim` independent trajectories of `n_days` buckets following
/// `observed`. Only the last `max_lag` buckets of `observed` matter; earlier
/// ones fall outside the serial interval. `observed` must cover at least
/// `max_lag` buckets.
pub fn project(
    observed: &IncidenceSeries,
    reproduction: &Reproduction,
    si: &SerialInterval,
    config: &ProjectionConfig,
) -> EpiResult<ProjectionEnsemble> {
    config.validate()?;
    reproduction.validate()?;
    if si.interval() != observed.interval() {
        return Err(EpiError::invalid_parameter(
            "interval",
            format!(
                "serial interval uses {}-day lags but incidence has {}-day buckets",
                si.interval(),
                observed.interval()
            ),
        ));
    }
    let required = si.max_lag();
    let Some(start) = observed.next_date().filter(|_| observed.len() >= required) else {
        return Err(EpiError::InsufficientHistory {
            required,
            found: observed.len(),
        });
    };

    let tail = observed.tail(si.max_lag());
    let simulations = (0..config.n_sim)
        .into_par_iter()
        .map(|index| simulate_one(tail.counts(), reproduction, si, config, index))
        .collect::<EpiResult<Vec<Vec<u64>>>>()?;

    // Each simulation is one column of the day x simulation table.
    let table = DMatrix::from_vec(config.n_days, config.n_sim, simulations.concat());
    debug!(
        "projected {} simulations over {} buckets from {}",
        config.n_sim, config.n_days, start
    );
    Ok(ProjectionEnsemble {
        start,
        interval: observed.interval(),
        table,
    })
}

/// Table of counts indexed by (future bucket, simulation).
pub trait DayBySimulation {
    fn table(&self) -> &DMatrix<u64>;
    fn start(&self) -> NaiveDate;
    fn interval(&self) -> u32;

    fn n_days(&self) -> usize {
        self.table().nrows()
    }

    fn n_sim(&self) -> usize {
        self.table().ncols()
    }

    fn get(&self, day: usize, sim: usize) -> u64 {
        self.table()[(day, sim)]
    }

    fn dates(&self) -> Vec<NaiveDate> {
        (0..self.n_days())
            .map(|d| self.start() + Duration::days((d as u32 * self.interval()) as i64))
            .collect()
    }

    /// Trajectory of one simulation.
    fn simulation(&self, sim: usize) -> Vec<u64> {
        self.table().column(sim).iter().copied().collect()
    }

    /// All simulated values for one bucket.
    fn day(&self, day: usize) -> Vec<u64> {
        self.table().row(day).iter().copied().collect()
    }

    /// Mean across simulations, per bucket.
    fn mean_per_day(&self) -> Vec<f64> {
        let n = self.n_sim() as f64;
        self.table()
            .row_iter()
            .map(|row| row.iter().map(|v| *v as f64).sum::<f64>() / n)
            .collect()
    }

    /// Quantile `p` across simulations, per bucket.
    fn quantile_per_day(&self, p: f64) -> Vec<f64> {
        self.table()
            .row_iter()
            .map(|row| {
                let values: Vec<f64> = row.iter().map(|v| *v as f64).collect();
                stats::quantile(&stats::sorted(&values), p)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionEnsemble {
    start: NaiveDate,
    interval: u32,
    table: DMatrix<u64>,
}

impl ProjectionEnsemble {
    /// Running totals along each trajectory. [`project`] rejects any
    /// trajectory whose total does not fit in a `u64`.
    pub fn cumulate(&self) -> CumulativeEnsemble {
        let mut table = self.table.clone();
        for mut column in table.column_iter_mut() {
            let mut total = 0u64;
            for value in column.iter_mut() {
                total = total.saturating_add(*value);
                *value = total;
            }
        }
        CumulativeEnsemble {
            start: self.start,
            interval: self.interval,
            table,
        }
    }
}

impl DayBySimulation for ProjectionEnsemble {
    fn table(&self) -> &DMatrix<u64> {
        &self.table
    }

    fn start(&self) -> NaiveDate {
        self.start
    }

    fn interval(&self) -> u32 {
        self.interval
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CumulativeEnsemble {
    start: NaiveDate,
    interval: u32,
    table: DMatrix<u64>,
}

impl DayBySimulation for CumulativeEnsemble {
    fn table(&self) -> &DMatrix<u64> {
        &self.table
    }

    fn start(&self) -> NaiveDate {
        self.start
    }

    fn interval(&self) -> u32 {
        self.interval
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, 1).unwrap()
    }

    fn observed(counts: Vec<u64>) -> IncidenceSeries {
        IncidenceSeries::from_counts(start(), 1, counts).unwrap()
    }

    fn config(n_days: usize, n_sim: usize, seed: u64) -> ProjectionConfig {
        ProjectionConfig {
            n_days,
            n_sim,
            dispersion: None,
            seed,
        }
    }

    fn reference_si() -> SerialInterval {
        SerialInterval::gamma(5.2, 2.8, 1, 0).unwrap()
    }

    #[test]
    fn test_shape_and_dates() {
        let si = reference_si();
        let r = Reproduction::Fixed(1.5);
        let ensemble = project(&observed(vec![5; 40]), &r, &si, &config(14, 20, 1)).unwrap();
        assert_eq!(ensemble.n_days(), 14);
        assert_eq!(ensemble.n_sim(), 20);
        let dates = ensemble.dates();
        assert_eq!(dates[0], start() + Duration::days(40));
        assert_eq!(dates[13], start() + Duration::days(53));
        assert_eq!(ensemble.simulation(3).len(), 14);
        assert_eq!(ensemble.day(0).len(), 20);
    }

    #[test]
    fn test_reproducible() {
        let si = reference_si();
        let mut counts = vec![2; 30];
        counts.extend([3, 4, 6, 9, 12, 18, 25]);
        let seed_series = observed(counts);
        let r = Reproduction::Sampled(RSample::from_draws(vec![1.2, 1.5, 1.8]));
        let a = project(&seed_series, &r, &si, &config(21, 50, 8675309)).unwrap();
        let b = project(&seed_series, &r, &si, &config(21, 50, 8675309)).unwrap();
        assert_eq!(a, b);
        let c = project(&seed_series, &r, &si, &config(21, 50, 1)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_simulation_independent_of_ensemble_size() {
        let si = reference_si();
        let seed_series = observed(vec![10; 40]);
        let r = Reproduction::Fixed(1.3);
        let small = project(&seed_series, &r, &si, &config(10, 5, 3)).unwrap();
        let large = project(&seed_series, &r, &si, &config(10, 50, 3)).unwrap();
        for sim in 0..5 {
            assert_eq!(small.simulation(sim), large.simulation(sim));
        }
    }

    #[test]
    fn test_cumulative_is_running_sum() {
        let si = reference_si();
        let r = Reproduction::Fixed(1.1);
        let ensemble = project(&observed(vec![20; 40]), &r, &si, &config(10, 30, 5)).unwrap();
        let cumulative = ensemble.cumulate();
        for sim in 0..ensemble.n_sim() {
            let daily = ensemble.simulation(sim);
            let running = cumulative.simulation(sim);
            let mut total = 0;
            for (d, c) in daily.iter().zip(&running) {
                total += d;
                assert_eq!(*c, total);
            }
            assert!(running.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_flat_at_r_one() {
        let si = reference_si();
        let r = Reproduction::Fixed(1.0);
        let ensemble = project(&observed(vec![50; 40]), &r, &si, &config(14, 2000, 42)).unwrap();
        let means = ensemble.mean_per_day();
        let overall = means.iter().sum::<f64>() / means.len() as f64;
        assert!(f64::abs(overall - 50.0) < 3.0, "mean {overall}");
        assert!(means.iter().all(|m| f64::abs(m - 50.0) < 5.0), "{means:?}");
    }

    #[test]
    fn test_seed_shorter_than_serial_interval() {
        let si = reference_si();
        let r = Reproduction::Fixed(1.0);
        assert_eq!(
            project(&observed(vec![50; 5]), &r, &si, &config(14, 100, 42)),
            Err(EpiError::InsufficientHistory {
                required: si.max_lag(),
                found: 5,
            })
        );
        let exact = observed(vec![50; si.max_lag()]);
        assert!(project(&exact, &r, &si, &config(14, 100, 42)).is_ok());
    }

    #[test]
    fn test_runaway_growth_is_rejected() {
        let si = SerialInterval::from_pmf(&[1.0], 1).unwrap();
        let r = Reproduction::Fixed(2.0);
        let result = project(&observed(vec![1_000_000]), &r, &si, &config(44, 1, 0));
        assert!(
            matches!(result, Err(EpiError::InvalidParameter { name: "reproduction", .. })),
            "{result:?}"
        );
        // A shorter horizon stays in range and cumulates exactly.
        let ensemble = project(&observed(vec![1_000_000]), &r, &si, &config(20, 1, 0)).unwrap();
        let daily = ensemble.simulation(0);
        let cumulative = ensemble.cumulate().simulation(0);
        assert_eq!(cumulative[19], daily.iter().sum::<u64>());
    }

    #[test]
    fn test_zero_reproduction_dies_out() {
        let si = reference_si();
        let r = Reproduction::Fixed(0.0);
        let ensemble = project(&observed(vec![50; 40]), &r, &si, &config(7, 10, 42)).unwrap();
        assert!(ensemble.table().iter().all(|v| *v == 0));
    }

    #[test]
    fn test_overdispersion_widens_spread() {
        let si = reference_si();
        let seed_series = observed(vec![50; 40]);
        let r = Reproduction::Fixed(1.0);
        let poisson = project(&seed_series, &r, &si, &config(1, 2000, 9)).unwrap();
        let mut nb_config = config(1, 2000, 9);
        nb_config.dispersion = Some(0.5);
        let nb = project(&seed_series, &r, &si, &nb_config).unwrap();
        let var = |e: &ProjectionEnsemble| {
            let values: Vec<f64> = e.day(0).iter().map(|v| *v as f64).collect();
            stats::std_dev(&values).powi(2)
        };
        assert!(var(&nb) > 5.0 * var(&poisson));
        let lo = nb.quantile_per_day(0.025)[0];
        let hi = nb.quantile_per_day(0.975)[0];
        assert!(lo < 50.0 && hi > 50.0);
    }

    #[test]
    fn test_invalid_inputs() {
        let si = reference_si();
        let seed_series = observed(vec![5; 40]);
        let one = Reproduction::Fixed(1.0);
        assert!(matches!(
            project(&observed(vec![]), &one, &si, &config(5, 5, 0)),
            Err(EpiError::InsufficientHistory { found: 0, .. })
        ));
        let negative = Reproduction::Fixed(-1.0);
        assert!(project(&seed_series, &negative, &si, &config(5, 5, 0)).is_err());
        let empty = Reproduction::Sampled(RSample::default());
        assert!(project(&seed_series, &empty, &si, &config(5, 5, 0)).is_err());
        assert!(project(&seed_series, &one, &si, &config(0, 5, 0)).is_err());
        assert!(project(&seed_series, &one, &si, &config(5, 0, 0)).is_err());
        let weekly = SerialInterval::gamma(5.2, 2.8, 7, 0).unwrap();
        assert!(project(&seed_series, &one, &weekly, &config(5, 5, 0)).is_err());
    }
}

use serde::Serialize;
use statrs::statistics::Statistics;

/// Quantile of an ascending slice by linear interpolation between order
/// statistics (`(n - 1) · p` positioning). NaN on an empty slice.
pub fn quantile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let h = (n - 1) as f64 * p.clamp(0.0, 1.0);
            let lo = h.floor() as usize;
            let hi = h.ceil() as usize;
            sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(f64::total_cmp);
    out
}

/// NaN on an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    Statistics::mean(values)
}

/// Sample standard deviation; zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    Statistics::std_dev(values)
}

/// Point summary of a set of draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub size: usize,
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub q025: f64,
    pub q975: f64,
}

impl Summary {
    pub fn of(values: &[f64]) -> Self {
        let sorted = sorted(values);
        Summary {
            size: values.len(),
            mean: mean(values),
            std: std_dev(values),
            median: quantile(&sorted, 0.5),
            q025: quantile(&sorted, 0.025),
            q975: quantile(&sorted, 0.975),
        }
    }
}

/// Equal-width histogram over `[lower, lower + width · counts.len()]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub lower: f64,
    pub width: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn of(values: &[f64], bins: usize) -> Self {
        let bins = bins.max(1);
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        if lo > hi {
            return Histogram {
                lower: 0.0,
                width: 0.0,
                counts: vec![0; bins],
            };
        }
        let width = if hi > lo { (hi - lo) / bins as f64 } else { 1.0 };
        let mut counts = vec![0; bins];
        for v in values.iter().filter(|v| v.is_finite()) {
            let bin = (((v - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }
        Histogram {
            lower: lo,
            width,
            counts,
        }
    }

    /// Lower edge of each bin.
    pub fn edges(&self) -> Vec<f64> {
        (0..self.counts.len())
            .map(|i| self.lower + i as f64 * self.width)
            .collect()
    }
}

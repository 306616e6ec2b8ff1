use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EpiError, EpiResult, ensure_positive},
    expand::CountSource,
    projection::ProjectionConfig,
    rt::RtConfig,
    serial_interval::{SerialInterval, UncertainSi},
};

/// Which growth segment a quantity refers to. For an unsplit fit both
/// select the single fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Before,
    After,
}

/// Source of the reproduction number used for projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum ProjectionR {
    Fixed { value: f64 },
    Growth { segment: Segment },
    LatestRt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub source: CountSource,
    /// Also build per-category incidence; needs `source = "total_active"`.
    pub stratify: bool,
    /// Bucket width in days.
    pub interval: u32,
    pub fit_start: Option<NaiveDate>,
    pub fit_end: Option<NaiveDate>,
    pub split_date: Option<NaiveDate>,
    pub mean_si: f64,
    pub std_si: f64,
    pub si_offset: usize,
    pub si_max_lag: Option<usize>,
    pub r_draws: usize,
    pub rt: RtConfig,
    pub uncertain_si: Option<UncertainSi>,
    pub projection_days: usize,
    pub n_sim: usize,
    pub dispersion: Option<f64>,
    pub projection_r: ProjectionR,
    pub histogram_bins: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Parameters {
            source: CountSource::NewCases,
            stratify: false,
            interval: 1,
            fit_start: None,
            fit_end: None,
            split_date: None,
            mean_si: 5.2,
            std_si: 2.8,
            si_offset: 0,
            si_max_lag: None,
            r_draws: 1000,
            rt: RtConfig::default(),
            uncertain_si: None,
            projection_days: 30,
            n_sim: 1000,
            dispersion: None,
            projection_r: ProjectionR::Growth {
                segment: Segment::After,
            },
            histogram_bins: 30,
        }
    }
}

impl Parameters {
    pub fn validate(&self) -> EpiResult<()> {
        if self.interval == 0 {
            return Err(EpiError::invalid_parameter("interval", "must be at least 1"));
        }
        if self.stratify && self.source != CountSource::TotalActive {
            return Err(EpiError::invalid_parameter(
                "stratify",
                "category incidence needs source = \"total_active\"",
            ));
        }
        if let (Some(start), Some(end)) = (self.fit_start, self.fit_end) {
            if start > end {
                return Err(EpiError::invalid_parameter(
                    "fit_start",
                    format!("{start} is after fit_end {end}"),
                ));
            }
        }
        ensure_positive("mean_si", self.mean_si)?;
        ensure_positive("std_si", self.std_si)?;
        if self.r_draws == 0 {
            return Err(EpiError::invalid_parameter("r_draws", "must be at least 1"));
        }
        if self.histogram_bins == 0 {
            return Err(EpiError::invalid_parameter(
                "histogram_bins",
                "must be at least 1",
            ));
        }
        self.rt.validate()?;
        if let Some(uncertain) = &self.uncertain_si {
            uncertain.validate()?;
        }
        if let ProjectionR::Fixed { value } = self.projection_r {
            if !(value.is_finite() && value >= 0.0) {
                return Err(EpiError::invalid_parameter(
                    "projection_r",
                    format!("fixed R must be non-negative, got {value}"),
                ));
            }
        }
        self.projection(0).validate()
    }

    pub fn serial_interval(&self) -> EpiResult<SerialInterval> {
        match self.si_max_lag {
            Some(max_lag) => SerialInterval::gamma_with_max_lag(
                self.mean_si,
                self.std_si,
                self.interval,
                self.si_offset,
                max_lag,
            ),
            None => SerialInterval::gamma(self.mean_si, self.std_si, self.interval, self.si_offset),
        }
    }

    pub fn projection(&self, seed: u64) -> ProjectionConfig {
        ProjectionConfig {
            n_days: self.projection_days,
            n_sim: self.n_sim,
            dispersion: self.dispersion,
            seed,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Parameters::default().validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let params: Parameters = serde_json::from_value(serde_json::json!({
            "source": "total_active",
            "stratify": true,
            "split_date": "2020-03-09",
            "rt": {"window": 5},
            "projection_r": {"from": "fixed", "value": 1.3},
            "uncertain_si": {
                "mean_si": 5.2, "std_mean_si": 1.0, "min_mean_si": 3.0, "max_mean_si": 7.0,
                "std_si": 2.8, "std_std_si": 0.5, "min_std_si": 1.5, "max_std_si": 4.0,
                "n1": 20, "n2": 20
            }
        }))
        .unwrap();
        assert_eq!(params.source, CountSource::TotalActive);
        assert_eq!(params.split_date, NaiveDate::from_ymd_opt(2020, 3, 9));
        assert_eq!(params.rt.window, 5);
        assert_eq!(params.rt.prior_mean, 5.0);
        assert_eq!(params.projection_r, ProjectionR::Fixed { value: 1.3 });
        assert_eq!(params.n_sim, 1000);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            Parameters {
                mean_si: -1.0,
                ..Parameters::default()
            },
            Parameters {
                stratify: true,
                ..Parameters::default()
            },
            Parameters {
                n_sim: 0,
                ..Parameters::default()
            },
            Parameters {
                fit_start: NaiveDate::from_ymd_opt(2020, 3, 9),
                fit_end: NaiveDate::from_ymd_opt(2020, 3, 1),
                ..Parameters::default()
            },
            Parameters {
                projection_r: ProjectionR::Fixed { value: f64::NAN },
                ..Parameters::default()
            },
        ];
        for params in cases {
            assert!(matches!(
                params.validate(),
                Err(EpiError::InvalidParameter { .. })
            ));
        }
    }
}

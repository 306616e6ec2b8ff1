//! End-to-end run: reports to incidence, growth fits, R samples, R(t) and
//! projections.
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    convert::{RSample, sample_r},
    error::{EpiError, EpiResult},
    expand::expand,
    growth::{GrowthFit, IncidenceFit, SegmentFit, fit_growth},
    incidence::IncidenceSeries,
    parameters::{Parameters, ProjectionR, Segment},
    projection::{CumulativeEnsemble, ProjectionEnsemble, Reproduction, project},
    report::CaseReport,
    rt::{RTimeSeries, estimate_rt, estimate_rt_uncertain},
    serial_interval::SerialInterval,
};

/// R sample derived from one fitted segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSample {
    pub segment: &'static str,
    pub sample: RSample,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub incidence: IncidenceSeries,
    pub stratified: Option<IncidenceSeries>,
    /// Incidence range the growth model was fit on.
    pub fit_range: IncidenceSeries,
    pub fit: IncidenceFit,
    pub serial_interval: SerialInterval,
    pub r_samples: Vec<SegmentSample>,
    pub rt: Option<RTimeSeries>,
    pub projection_r: Reproduction,
    pub projection: ProjectionEnsemble,
    pub cumulative: CumulativeEnsemble,
}

impl Outcome {
    pub fn r_sample(&self, segment: &str) -> Option<&RSample> {
        self.r_samples
            .iter()
            .find(|s| s.segment == segment)
            .map(|s| &s.sample)
    }
}

fn fitted_segments(fit: &IncidenceFit) -> Vec<(&'static str, &GrowthFit)> {
    match fit {
        IncidenceFit::Single(fit) => vec![("all", fit)],
        IncidenceFit::Split(split) => [("before", &split.before), ("after", &split.after)]
            .into_iter()
            .filter_map(|(label, segment)| match segment {
                SegmentFit::Fitted(fit) => Some((label, fit)),
                SegmentFit::Failed(_) => None,
            })
            .collect(),
    }
}

fn segment_label(fit: &IncidenceFit, segment: Segment) -> &'static str {
    match (fit, segment) {
        (IncidenceFit::Single(_), _) => "all",
        (IncidenceFit::Split(_), Segment::Before) => "before",
        (IncidenceFit::Split(_), Segment::After) => "after",
    }
}

/// Runs the full pipeline. All randomness derives from `seed`.
pub fn run(params: &Parameters, reports: &[CaseReport], seed: u64) -> EpiResult<Outcome> {
    params.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);

    let events = expand(reports, params.source)?;
    let incidence = IncidenceSeries::from_events(&events, params.interval)?;
    let stratified = if params.stratify {
        Some(IncidenceSeries::stratified(&events, params.interval)?)
    } else {
        None
    };
    info!(
        "{} cases over {} buckets from {:?}",
        incidence.total(),
        incidence.len(),
        incidence.first_date()
    );

    let fit_range = match (incidence.first_date(), incidence.last_date()) {
        (Some(first), Some(last)) => incidence.slice(
            params.fit_start.unwrap_or(first),
            params.fit_end.unwrap_or(last),
        ),
        _ => incidence.clone(),
    };
    let fit = fit_growth(&fit_range, params.split_date)?;
    match &fit {
        IncidenceFit::Single(fit) => info!("growth: {fit}"),
        IncidenceFit::Split(split) => {
            for (label, segment) in [("before", &split.before), ("after", &split.after)] {
                if let SegmentFit::Fitted(fit) = segment {
                    info!("growth {label} {}: {fit}", split.split);
                }
            }
        }
    }

    let serial_interval = params.serial_interval()?;
    let r_samples = fitted_segments(&fit)
        .into_iter()
        .map(|(segment, fit)| {
            Ok(SegmentSample {
                segment,
                sample: sample_r(fit, &serial_interval, params.r_draws, &mut rng)?,
            })
        })
        .collect::<EpiResult<Vec<_>>>()?;

    let rt = match &params.uncertain_si {
        Some(uncertain) => estimate_rt_uncertain(
            &incidence,
            uncertain,
            params.si_offset,
            &params.rt,
            &mut rng,
        ),
        None => estimate_rt(&incidence, &serial_interval, &params.rt),
    };
    let rt = match rt {
        Ok(rt) => Some(rt),
        Err(err @ EpiError::InsufficientHistory { .. })
            if params.projection_r != ProjectionR::LatestRt =>
        {
            warn!("skipping R(t): {err}");
            None
        }
        Err(err) => return Err(err),
    };

    let projection_r = match &params.projection_r {
        ProjectionR::Fixed { value } => Reproduction::Fixed(*value),
        ProjectionR::Growth { segment } => {
            let label = segment_label(&fit, *segment);
            let sample = r_samples
                .iter()
                .find(|s| s.segment == label)
                .ok_or_else(|| EpiError::DegenerateFit {
                    reason: format!("no fitted `{label}` segment to project from"),
                })?;
            Reproduction::Sampled(sample.sample.clone())
        }
        ProjectionR::LatestRt => {
            let latest = rt.as_ref().and_then(|rt| rt.latest()).ok_or_else(|| {
                EpiError::InsufficientHistory {
                    required: params.rt.window + 1,
                    found: incidence.len(),
                }
            })?;
            Reproduction::Fixed(latest.mean_r)
        }
    };

    let projection = project(
        &incidence,
        &projection_r,
        &serial_interval,
        &params.projection(seed),
    )?;
    let cumulative = projection.cumulate();
    info!(
        "projected {} simulations over {} buckets",
        params.n_sim, params.projection_days
    );

    Ok(Outcome {
        incidence,
        stratified,
        fit_range,
        fit,
        serial_interval,
        r_samples,
        rt,
        projection_r,
        projection,
        cumulative,
    })
}

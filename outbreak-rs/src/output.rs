//! Tabular views of a pipeline outcome, ready for CSV and JSON writers.
use chrono::NaiveDate;
use run::{RunContext, RunResult};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    growth::{GrowthFit, IncidenceFit, SegmentFit},
    incidence::IncidenceSeries,
    pipeline::Outcome,
    projection::{DayBySimulation, Reproduction},
    report::Category,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRow {
    pub date: NaiveDate,
    pub total: u64,
    pub hospital: u64,
    pub icu: u64,
    pub home: u64,
}

pub fn category_rows(series: &IncidenceSeries) -> Vec<CategoryRow> {
    let column = |category: Category, i: usize| series.group(category).map_or(0, |c| c[i]);
    series
        .dates()
        .iter()
        .enumerate()
        .map(|(i, &date)| CategoryRow {
            date,
            total: series.counts()[i],
            hospital: column(Category::Hospital, i),
            icu: column(Category::Icu, i),
            home: column(Category::Home, i),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RDrawRow {
    pub segment: &'static str,
    pub draw: usize,
    pub r: f64,
}

pub fn r_draw_rows(outcome: &Outcome) -> Vec<RDrawRow> {
    outcome
        .r_samples
        .iter()
        .flat_map(|s| {
            s.sample
                .draws()
                .iter()
                .enumerate()
                .map(move |(draw, &r)| RDrawRow {
                    segment: s.segment,
                    draw,
                    r,
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramRow {
    pub segment: &'static str,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

pub fn r_histogram_rows(outcome: &Outcome, bins: usize) -> Vec<HistogramRow> {
    outcome
        .r_samples
        .iter()
        .flat_map(|s| {
            let histogram = s.sample.histogram(bins);
            let width = histogram.width;
            histogram
                .edges()
                .into_iter()
                .zip(histogram.counts)
                .map(move |(lower, count)| HistogramRow {
                    segment: s.segment,
                    lower,
                    upper: lower + width,
                    count,
                })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionSummaryRow {
    pub date: NaiveDate,
    pub mean: f64,
    pub median: f64,
    pub q025: f64,
    pub q975: f64,
    pub cumulative_mean: f64,
    pub cumulative_q025: f64,
    pub cumulative_q975: f64,
}

pub fn projection_summary_rows(outcome: &Outcome) -> Vec<ProjectionSummaryRow> {
    let daily = &outcome.projection;
    let cumulative = &outcome.cumulative;
    let (mean, median, q025, q975) = (
        daily.mean_per_day(),
        daily.quantile_per_day(0.5),
        daily.quantile_per_day(0.025),
        daily.quantile_per_day(0.975),
    );
    let (c_mean, c_q025, c_q975) = (
        cumulative.mean_per_day(),
        cumulative.quantile_per_day(0.025),
        cumulative.quantile_per_day(0.975),
    );
    daily
        .dates()
        .into_iter()
        .enumerate()
        .map(|(d, date)| ProjectionSummaryRow {
            date,
            mean: mean[d],
            median: median[d],
            q025: q025[d],
            q975: q975[d],
            cumulative_mean: c_mean[d],
            cumulative_q025: c_q025[d],
            cumulative_q975: c_q975[d],
        })
        .collect()
}

/// Wide table: one row per date, one column per simulation.
pub fn ensemble_table<E: DayBySimulation>(ensemble: &E) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers = vec!["date".to_string()];
    headers.extend((0..ensemble.n_sim()).map(|sim| format!("sim_{sim}")));
    let rows = ensemble
        .dates()
        .into_iter()
        .enumerate()
        .map(|(d, date)| {
            let mut row = vec![date.to_string()];
            row.extend(ensemble.day(d).iter().map(u64::to_string));
            row
        })
        .collect();
    (headers, rows)
}

fn fit_json(fit: &GrowthFit) -> Value {
    let (lo, hi) = fit.slope_interval(0.95);
    json!({
        "origin": fit.origin,
        "intercept": fit.intercept,
        "growth_rate": fit.slope,
        "growth_rate_std_error": fit.slope_std_error,
        "growth_rate_ci95": [lo, hi],
        "r_squared": fit.r_squared,
        "n_observations_used": fit.n_observations_used,
        "doubling_time": fit.doubling_time(),
        "halving_time": fit.halving_time(),
        "time_ci95": fit.time_interval(0.95).map(|(a, b)| [a, b]),
        "summary": fit.to_string(),
    })
}

fn segment_json(segment: &SegmentFit) -> Value {
    match segment {
        SegmentFit::Fitted(fit) => fit_json(fit),
        SegmentFit::Failed(err) => json!({ "error": err.to_string() }),
    }
}

pub fn growth_json(fit: &IncidenceFit) -> Value {
    match fit {
        IncidenceFit::Single(fit) => json!({ "all": fit_json(fit) }),
        IncidenceFit::Split(split) => json!({
            "split": split.split,
            "before": segment_json(&split.before),
            "after": segment_json(&split.after),
        }),
    }
}

/// Run-level summary document.
pub fn summary_json(
    outcome: &Outcome,
    seed: u64,
    replicate: u64,
    input_sha256: Option<&str>,
) -> Value {
    let samples: serde_json::Map<String, Value> = outcome
        .r_samples
        .iter()
        .map(|s| (s.segment.to_string(), json!(s.sample.summary())))
        .collect();
    let si = &outcome.serial_interval;
    let projection_r = match &outcome.projection_r {
        Reproduction::Fixed(r) => json!({ "fixed": r }),
        Reproduction::Sampled(sample) => json!({ "sampled": sample.summary() }),
    };
    let final_totals = outcome
        .cumulative
        .day(outcome.cumulative.n_days() - 1)
        .iter()
        .map(|v| *v as f64)
        .collect::<Vec<_>>();
    json!({
        "seed": seed,
        "replicate": replicate,
        "input_sha256": input_sha256,
        "cases": outcome.incidence.total(),
        "first_date": outcome.incidence.first_date(),
        "last_date": outcome.incidence.last_date(),
        "growth": growth_json(&outcome.fit),
        "serial_interval": {
            "mean": si.mean(),
            "sd": si.sd(),
            "max_lag": si.max_lag(),
            "gamma": si.gamma_shape(),
        },
        "r_from_growth": samples,
        "latest_rt": outcome.rt.as_ref().and_then(|rt| rt.latest()),
        "projection": {
            "reproduction": projection_r,
            "n_sim": outcome.projection.n_sim(),
            "n_days": outcome.projection.n_days(),
            "total_new_cases": crate::stats::Summary::of(&final_totals),
        },
    })
}

/// Writes every output table for `outcome` to the run destination.
pub fn write_outputs<P>(
    ctx: &RunContext<P>,
    outcome: &Outcome,
    histogram_bins: usize,
    input_sha256: Option<&str>,
) -> RunResult<()> {
    ctx.write_csv("incidence.csv", &outcome.incidence.rows())?;
    if let Some(stratified) = &outcome.stratified {
        ctx.write_csv("incidence_by_category.csv", &category_rows(stratified))?;
    }
    ctx.write_json("growth_fit.json", &growth_json(&outcome.fit))?;
    ctx.write_csv("r_sample.csv", &r_draw_rows(outcome))?;
    ctx.write_csv(
        "r_histogram.csv",
        &r_histogram_rows(outcome, histogram_bins),
    )?;
    if let Some(rt) = &outcome.rt {
        ctx.write_csv("rt.csv", rt.windows())?;
    }

    let (headers, rows) = ensemble_table(&outcome.projection);
    ctx.write_table("projection.csv", &headers, &rows)?;
    let (headers, rows) = ensemble_table(&outcome.cumulative);
    ctx.write_table("projection_cumulative.csv", &headers, &rows)?;
    ctx.write_csv("projection_summary.csv", &projection_summary_rows(outcome))?;

    ctx.write_json(
        "summary.json",
        &summary_json(outcome, ctx.seed, ctx.replicate, input_sha256),
    )
}

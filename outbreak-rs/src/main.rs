use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use outbreak::{CaseReport, Parameters, output::write_outputs};
use run::RunContext;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // A TOML run file may be given as the only argument; otherwise the run
    // document arrives as JSON on stdin.
    let ctx = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => RunContext::from_toml_path(&path)
            .with_context(|| format!("loading run file {}", path.display()))?,
        None => RunContext::from_stdin().context("reading run document from stdin")?,
    };
    let ctx = ctx
        .with_params::<Parameters>()
        .context("decoding model parameters")?;
    let params = ctx.params.clone().unwrap_or_default();

    let reports: Vec<CaseReport> = ctx.read_csv("reports").context("reading case reports")?;
    info!("{} case reports, seed {}", reports.len(), ctx.seed);

    let outcome = outbreak::run(&params, &reports, ctx.seed)?;
    let fingerprint = ctx.fingerprint("reports")?;
    write_outputs(&ctx, &outcome, params.histogram_bins, Some(&fingerprint))
        .context("writing outputs")?;
    info!(
        "done: {} cases, {} projected buckets",
        outcome.incidence.total(),
        params.projection_days
    );
    Ok(())
}

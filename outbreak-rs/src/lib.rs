//! Outbreak analysis from daily case reports: incidence, exponential growth
//! fits, reproduction numbers and stochastic case projections.
pub mod convert;
pub mod error;
pub mod expand;
pub mod growth;
pub mod incidence;
pub mod output;
pub mod parameters;
pub mod pipeline;
pub mod projection;
pub mod report;
pub mod rt;
pub mod serial_interval;
pub mod stats;

pub use convert::{RSample, r_from_growth, sample_r, sample_segment_r};
pub use error::{EpiError, EpiResult};
pub use expand::{CaseEvent, CountSource, EventSequence, expand};
pub use growth::{GrowthFit, IncidenceFit, SegmentFit, SplitFit, fit, fit_growth, fit_split};
pub use incidence::IncidenceSeries;
pub use parameters::{Parameters, ProjectionR, Segment};
pub use pipeline::{Outcome, run};
pub use projection::{
    CumulativeEnsemble, DayBySimulation, ProjectionConfig, ProjectionEnsemble, Reproduction,
    project,
};
pub use report::{CaseReport, Category};
pub use rt::{RTimeSeries, RtConfig, RtWindow, estimate_rt, estimate_rt_uncertain};
pub use serial_interval::{GammaShape, SerialInterval, UncertainSi};

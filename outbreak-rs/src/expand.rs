//! Expansion of daily reports into one event per case.
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{EpiError, EpiResult},
    report::{CaseReport, Category},
};

/// Which report column drives the expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountSource {
    /// `new_cases`, producing untagged events.
    #[default]
    NewCases,
    /// `total_active`, producing events tagged by clinical category.
    TotalActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CaseEvent {
    pub date: NaiveDate,
    pub category: Option<Category>,
}

/// Date-ordered multiset of individual case dates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventSequence {
    events: Vec<CaseEvent>,
}

impl EventSequence {
    /// Builds a sequence from arbitrary events; the sort is stable so that
    /// same-day events keep their relative order.
    pub fn from_events(mut events: Vec<CaseEvent>) -> Self {
        events.sort_by_key(|e| e.date);
        EventSequence { events }
    }

    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self::from_events(
            dates
                .into_iter()
                .map(|date| CaseEvent {
                    date,
                    category: None,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[CaseEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaseEvent> {
        self.events.iter()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.events.first().map(|e| e.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.events.last().map(|e| e.date)
    }

    /// True when every event carries a category.
    pub fn is_categorised(&self) -> bool {
        self.events.iter().all(|e| e.category.is_some())
    }
}

/// Largest count a single report cell may carry; every case becomes one
/// event in memory.
pub const MAX_ROW_COUNT: u32 = u32::MAX;

fn whole_count(date: NaiveDate, column: &'static str, value: f64) -> EpiResult<u64> {
    if !(value.is_finite() && value >= 0.0 && value.fract() == 0.0) {
        return Err(EpiError::InvalidCount {
            date,
            column,
            value,
        });
    }
    if value > f64::from(MAX_ROW_COUNT) {
        return Err(EpiError::invalid_parameter(
            column,
            format!("count {value} on {date} exceeds the per-row limit of {MAX_ROW_COUNT}"),
        ));
    }
    Ok(value as u64)
}

/// Emits one event per counted case.
///
/// With [`CountSource::TotalActive`] each row must break its total down
/// exactly into the three categories; copies are emitted per category in
/// [`Category::ALL`] order.
pub fn expand(reports: &[CaseReport], source: CountSource) -> EpiResult<EventSequence> {
    for pair in reports.windows(2) {
        if pair[1].date <= pair[0].date {
            return Err(EpiError::invalid_parameter(
                "date",
                format!(
                    "report dates must be strictly increasing, {} follows {}",
                    pair[1].date, pair[0].date
                ),
            ));
        }
    }

    let mut events = Vec::new();
    for report in reports {
        let date = report.date;
        match source {
            CountSource::NewCases => {
                let n = whole_count(date, "new_cases", report.new_cases)?;
                events.extend((0..n).map(|_| CaseEvent {
                    date,
                    category: None,
                }));
            }
            CountSource::TotalActive => {
                let total = whole_count(date, "total_active", report.total_active)?;
                let mut counts = [0u64; 3];
                for (slot, category) in counts.iter_mut().zip(Category::ALL) {
                    *slot = whole_count(date, category.as_str(), report.active(category))?;
                }
                if counts.iter().sum::<u64>() != total {
                    return Err(EpiError::InvalidCount {
                        date,
                        column: "total_active",
                        value: report.total_active,
                    });
                }
                for (n, category) in counts.into_iter().zip(Category::ALL) {
                    events.extend((0..n).map(|_| CaseEvent {
                        date,
                        category: Some(category),
                    }));
                }
            }
        }
    }
    debug!(
        "expanded {} reports into {} events ({:?})",
        reports.len(),
        events.len(),
        source
    );
    Ok(EventSequence { events })
}

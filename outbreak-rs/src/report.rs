//! Daily case reports, the decoded input table of the pipeline.
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Clinical category of an active case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Hospital,
    Icu,
    Home,
}

impl Category {
    /// Fixed order used whenever categories are enumerated.
    pub const ALL: [Category; 3] = [Category::Hospital, Category::Icu, Category::Home];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Hospital => "hospital",
            Category::Icu => "icu",
            Category::Home => "home",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the daily report. Counts are kept as decoded so that
/// malformed values can be rejected during expansion.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CaseReport {
    #[serde(deserialize_with = "deserialize_date")]
    pub date: NaiveDate,
    pub new_cases: f64,
    #[serde(default)]
    pub hospitalized: f64,
    #[serde(default)]
    pub icu: f64,
    #[serde(default)]
    pub home_quarantine: f64,
    #[serde(default)]
    pub total_active: f64,
}

impl CaseReport {
    pub fn new(date: NaiveDate, new_cases: f64) -> Self {
        CaseReport {
            date,
            new_cases,
            hospitalized: 0.0,
            icu: 0.0,
            home_quarantine: 0.0,
            total_active: 0.0,
        }
    }

    /// Builder-style setter for the active-case breakdown; the total is the
    /// sum of the three categories.
    pub fn with_active(mut self, hospitalized: f64, icu: f64, home_quarantine: f64) -> Self {
        self.hospitalized = hospitalized;
        self.icu = icu;
        self.home_quarantine = home_quarantine;
        self.total_active = hospitalized + icu + home_quarantine;
        self
    }

    pub fn active(&self, category: Category) -> f64 {
        match category {
            Category::Hospital => self.hospitalized,
            Category::Icu => self.icu,
            Category::Home => self.home_quarantine,
        }
    }
}

/// Parses a calendar date, dropping any time-of-day component.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(|dt| dt.date())
        })
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognised date `{raw}`")))
}

//! Dense, zero-filled incidence series built from case events.
use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use log::debug;
use serde::Serialize;

use crate::{
    error::{EpiError, EpiResult},
    expand::EventSequence,
    report::Category,
};

/// Case counts per fixed-width interval.
///
/// Bucket `i` covers `[dates[i], dates[i] + interval)`. Buckets are
/// contiguous from the first event's date to the bucket holding the last
/// one, with empty buckets present as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidenceSeries {
    interval: u32,
    dates: Vec<NaiveDate>,
    counts: Vec<u64>,
    groups: BTreeMap<Category, Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IncidenceRow {
    pub date: NaiveDate,
    pub count: u64,
}

fn check_interval(interval: u32) -> EpiResult<()> {
    if interval == 0 {
        return Err(EpiError::invalid_parameter(
            "interval",
            "must be at least one day",
        ));
    }
    Ok(())
}

fn bucket_dates(start: NaiveDate, interval: u32, len: usize) -> Vec<NaiveDate> {
    (0..len)
        .map(|i| start + Duration::days(i as i64 * interval as i64))
        .collect()
}

impl IncidenceSeries {
    /// Unstratified incidence of `events`.
    pub fn from_events(events: &EventSequence, interval: u32) -> EpiResult<Self> {
        Self::build(events, interval, false)
    }

    /// Incidence of `events` with per-category counts alongside the totals.
    /// Every event must carry a category.
    pub fn stratified(events: &EventSequence, interval: u32) -> EpiResult<Self> {
        Self::build(events, interval, true)
    }

    fn build(events: &EventSequence, interval: u32, stratify: bool) -> EpiResult<Self> {
        check_interval(interval)?;
        if stratify && !events.is_categorised() {
            return Err(EpiError::invalid_parameter(
                "events",
                "stratified incidence needs a category on every event",
            ));
        }
        let (Some(first), Some(last)) = (events.first_date(), events.last_date()) else {
            return Ok(IncidenceSeries {
                interval,
                dates: Vec::new(),
                counts: Vec::new(),
                groups: BTreeMap::new(),
            });
        };

        let width = interval as i64;
        let len = ((last - first).num_days() / width + 1) as usize;
        let mut counts = vec![0u64; len];
        let mut groups: BTreeMap<Category, Vec<u64>> = BTreeMap::new();
        if stratify {
            for category in Category::ALL {
                groups.insert(category, vec![0; len]);
            }
        }
        for event in events.iter() {
            let bucket = ((event.date - first).num_days() / width) as usize;
            counts[bucket] += 1;
            if let (true, Some(category)) = (stratify, event.category) {
                if let Some(column) = groups.get_mut(&category) {
                    column[bucket] += 1;
                }
            }
        }
        debug!(
            "incidence: {} events into {} buckets of {} day(s) from {}",
            events.len(),
            len,
            interval,
            first
        );
        Ok(IncidenceSeries {
            interval,
            dates: bucket_dates(first, interval, len),
            counts,
            groups,
        })
    }

    /// Builds a series directly from counts starting at `start`.
    pub fn from_counts(start: NaiveDate, interval: u32, counts: Vec<u64>) -> EpiResult<Self> {
        check_interval(interval)?;
        Ok(IncidenceSeries {
            interval,
            dates: bucket_dates(start, interval, counts.len()),
            counts,
            groups: BTreeMap::new(),
        })
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    /// Date following the last bucket.
    pub fn next_date(&self) -> Option<NaiveDate> {
        self.last_date()
            .map(|d| d + Duration::days(self.interval as i64))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Index of the bucket containing `date`.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        let first = self.first_date()?;
        let offset = (date - first).num_days();
        if offset < 0 {
            return None;
        }
        let index = (offset / self.interval as i64) as usize;
        (index < self.len()).then_some(index)
    }

    pub fn get(&self, date: NaiveDate) -> Option<u64> {
        self.index_of(date).map(|i| self.counts[i])
    }

    pub fn is_stratified(&self) -> bool {
        !self.groups.is_empty()
    }

    pub fn group(&self, category: Category) -> Option<&[u64]> {
        self.groups.get(&category).map(Vec::as_slice)
    }

    pub fn groups(&self) -> &BTreeMap<Category, Vec<u64>> {
        &self.groups
    }

    pub fn rows(&self) -> Vec<IncidenceRow> {
        self.dates
            .iter()
            .zip(&self.counts)
            .map(|(&date, &count)| IncidenceRow { date, count })
            .collect()
    }

    pub fn cumulative(&self) -> Vec<u64> {
        self.counts
            .iter()
            .scan(0u64, |acc, &c| {
                *acc += c;
                Some(*acc)
            })
            .collect()
    }

    fn select(&self, range: std::ops::Range<usize>) -> Self {
        IncidenceSeries {
            interval: self.interval,
            dates: self.dates[range.clone()].to_vec(),
            counts: self.counts[range.clone()].to_vec(),
            groups: self
                .groups
                .iter()
                .map(|(&k, v)| (k, v[range.clone()].to_vec()))
                .collect(),
        }
    }

    /// Buckets whose start date lies in `from..=to`, as a new series.
    pub fn slice(&self, from: NaiveDate, to: NaiveDate) -> Self {
        let lo = self.dates.partition_point(|d| *d < from);
        let hi = self.dates.partition_point(|d| *d <= to).max(lo);
        self.select(lo..hi)
    }

    /// The last `n` buckets (or all of them when the series is shorter).
    pub fn tail(&self, n: usize) -> Self {
        let len = self.len();
        self.select(len.saturating_sub(n)..len)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        expand::{CountSource, expand},
        report::CaseReport,
    };

    fn day(d: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 2, 24).unwrap() + Duration::days(d)
    }

    #[test]
    fn test_zero_fill() {
        let events = EventSequence::from_dates(vec![day(0), day(0), day(3)]);
        let series = IncidenceSeries::from_events(&events, 1).unwrap();
        assert_eq!(series.counts(), &[2, 0, 0, 1]);
        assert_eq!(series.dates(), &[day(0), day(1), day(2), day(3)]);
        assert_eq!(series.total(), 3);
        assert_eq!(series.next_date(), Some(day(4)));
    }

    #[test]
    fn test_weekly_interval() {
        let events = EventSequence::from_dates(vec![day(0), day(6), day(7), day(15)]);
        let series = IncidenceSeries::from_events(&events, 7).unwrap();
        assert_eq!(series.counts(), &[2, 1, 1]);
        assert_eq!(series.dates(), &[day(0), day(7), day(14)]);
        assert_eq!(series.index_of(day(13)), Some(1));
        assert_eq!(series.get(day(16)), Some(1));
        assert_eq!(series.index_of(day(21)), None);
    }

    #[test]
    fn test_empty_events() {
        let series = IncidenceSeries::from_events(&EventSequence::default(), 1).unwrap();
        assert!(series.is_empty());
        assert_eq!(series.first_date(), None);
    }

    #[test]
    fn test_zero_interval() {
        let events = EventSequence::from_dates(vec![day(0)]);
        assert!(IncidenceSeries::from_events(&events, 0).is_err());
    }

    #[test]
    fn test_stratified() {
        let reports = vec![
            CaseReport::new(day(0), 0.0).with_active(1.0, 0.0, 2.0),
            CaseReport::new(day(2), 0.0).with_active(0.0, 1.0, 0.0),
        ];
        let events = expand(&reports, CountSource::TotalActive).unwrap();
        let series = IncidenceSeries::stratified(&events, 1).unwrap();
        assert!(series.is_stratified());
        assert_eq!(series.counts(), &[3, 0, 1]);
        assert_eq!(series.group(Category::Hospital), Some(&[1, 0, 0][..]));
        assert_eq!(series.group(Category::Icu), Some(&[0, 0, 1][..]));
        assert_eq!(series.group(Category::Home), Some(&[2, 0, 0][..]));

        let untagged = EventSequence::from_dates(vec![day(0)]);
        assert!(IncidenceSeries::stratified(&untagged, 1).is_err());
    }

    #[test]
    fn test_slice_and_tail() {
        let series = IncidenceSeries::from_counts(day(0), 1, vec![1, 2, 3, 4, 5]).unwrap();
        let sliced = series.slice(day(1), day(3));
        assert_eq!(sliced.counts(), &[2, 3, 4]);
        assert_eq!(sliced.first_date(), Some(day(1)));
        assert_eq!(series.counts(), &[1, 2, 3, 4, 5]);

        assert!(series.slice(day(4), day(1)).is_empty());
        assert_eq!(series.tail(2).counts(), &[4, 5]);
        assert_eq!(series.tail(10).len(), 5);
        assert_eq!(series.cumulative(), vec![1, 3, 6, 10, 15]);
    }

    fn category_strategy() -> impl Strategy<Value = Category> {
        prop_oneof![
            Just(Category::Hospital),
            Just(Category::Icu),
            Just(Category::Home)
        ]
    }

    proptest! {
        #[test]
        fn prop_conservation_and_zero_fill(
            offsets in prop::collection::vec(0i64..120, 0..300),
            interval in 1u32..10,
        ) {
            let events = EventSequence::from_dates(offsets.iter().map(|&d| day(d)));
            let series = IncidenceSeries::from_events(&events, interval).unwrap();
            prop_assert_eq!(series.total(), events.len() as u64);
            for pair in series.dates().windows(2) {
                prop_assert_eq!((pair[1] - pair[0]).num_days(), interval as i64);
            }
            if let (Some(first), Some(last)) = (events.first_date(), events.last_date()) {
                prop_assert_eq!(series.first_date(), Some(first));
                prop_assert!(series.index_of(last).is_some());
            }
        }

        #[test]
        fn prop_stratification_consistency(
            tagged in prop::collection::vec((0i64..60, category_strategy()), 1..200),
            interval in 1u32..5,
        ) {
            let events = EventSequence::from_events(
                tagged
                    .iter()
                    .map(|&(d, c)| crate::expand::CaseEvent { date: day(d), category: Some(c) })
                    .collect(),
            );
            let plain = IncidenceSeries::from_events(&events, interval).unwrap();
            let strat = IncidenceSeries::stratified(&events, interval).unwrap();
            prop_assert_eq!(plain.counts(), strat.counts());
            for i in 0..strat.len() {
                let sum: u64 = strat.groups().values().map(|col| col[i]).sum();
                prop_assert_eq!(sum, plain.counts()[i]);
            }
        }
    }
}

//! Stage 3: planned but not visited.
//!
//! Non-visits inside the range feed the trend, reason and salesperson views.
//! Recurrence looks further back (the range plus the 8 preceding weeks) over
//! every report regardless of filters, so a customer's history is complete
//! even when the visible slice is narrow.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::{ReasonCategory, User, Visited, WeeklyReport};

use super::directory::{FilterOptions, ScopeFilters, UserDirectory};
use super::metrics::{normalize_customer_name, rate, Accumulator};
use super::ranges::DateRange;
use super::week::{format_date_key, iso_week_label, parse_date_key};

pub const RECURRENCE_LOOKBACK_WEEKS: i64 = 8;
pub const MIN_REPEAT_WEEKS: usize = 2;
pub const TOP_REPEATED_LIMIT: usize = 50;
pub const DRILLDOWN_LIMIT: usize = 100;

pub struct Stage3Input<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a DateRange,
    pub filters: &'a ScopeFilters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NonVisitTally {
    planned_visits: u32,
    non_visits: u32,
}

impl NonVisitTally {
    fn record(&mut self, missed: bool) {
        self.planned_visits += 1;
        if missed {
            self.non_visits += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonVisitMetrics {
    pub planned_visits: u32,
    pub non_visits: u32,
    pub non_visit_rate: f64,
}

impl From<NonVisitTally> for NonVisitMetrics {
    fn from(tally: NonVisitTally) -> Self {
        Self {
            planned_visits: tally.planned_visits,
            non_visits: tally.non_visits,
            non_visit_rate: rate(tally.non_visits, tally.planned_visits),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyNonVisits {
    pub week_key: String,
    #[serde(flatten)]
    pub metrics: NonVisitMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonShare {
    pub category: String,
    pub count: u32,
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalespersonNonVisits {
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    #[serde(flatten)]
    pub metrics: NonVisitMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatedCustomer {
    pub salesman_id: String,
    pub salesman_name: String,
    pub team: String,
    pub customer_name: String,
    pub normalized_customer: String,
    #[serde(rename = "occurrences8w")]
    pub occurrences_8w: u32,
    pub distinct_weeks: u32,
    pub weeks: Vec<String>,
    pub last_non_visit_date: String,
    pub dominant_reason_category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonVisitDrilldownRow {
    pub date: String,
    pub week_key: String,
    pub salesman_id: String,
    pub salesman_name: String,
    pub team: String,
    pub customer_name: String,
    pub location_area: String,
    pub contact_type: String,
    pub reason_category: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrenceWindow {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage3Payload {
    pub range: DateRange,
    pub filters: ScopeFilters,
    pub recurrence_window: RecurrenceWindow,
    pub totals: NonVisitMetrics,
    pub weekly_trend: Vec<WeeklyNonVisits>,
    pub reason_distribution: Vec<ReasonShare>,
    pub by_salesperson: Vec<SalespersonNonVisits>,
    pub top_repeated_customers: Vec<RepeatedCustomer>,
    pub drilldown: Vec<NonVisitDrilldownRow>,
    pub filter_options: FilterOptions,
}

pub fn build_stage3_payload(input: Stage3Input<'_>) -> Stage3Payload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();

    let mut totals = NonVisitTally::default();
    let mut weekly: Accumulator<String, NonVisitTally> = Accumulator::new();
    let mut reasons: Accumulator<String, u32> = Accumulator::new();
    let mut by_salesperson: Accumulator<String, NonVisitTally> = Accumulator::new();
    let mut drilldown = Vec::new();

    for report in input.reports {
        let profile = directory.profile(&report.salesman_id);
        if !filters.matches(&profile) {
            continue;
        }
        for row in &report.planning_rows {
            if !row.is_meaningful() {
                continue;
            }
            let Some(date) = parse_date_key(&row.date) else {
                continue;
            };
            if !input.range.contains(date) {
                continue;
            }
            let actual = report.actual_row_for(&row.date);
            let missed = actual.is_some_and(|item| item.visited == Visited::No);
            let week_key = iso_week_label(date);

            totals.record(missed);
            weekly.entry(week_key.clone()).record(missed);
            by_salesperson.entry(profile.id.clone()).record(missed);

            let Some(actual) = actual.filter(|_| missed) else {
                continue;
            };
            let category = actual.not_visited_reason_category.bucket();
            *reasons.entry(category.to_string()) += 1;
            drilldown.push(NonVisitDrilldownRow {
                date: row.date.clone(),
                week_key,
                salesman_id: profile.id.clone(),
                salesman_name: profile.name.clone(),
                team: profile.team.clone(),
                customer_name: row.customer_name.trim().to_string(),
                location_area: row.location_area.trim().to_string(),
                contact_type: row.contact_type.bucket().to_string(),
                reason_category: category.to_string(),
                reason: actual.not_visited_reason.trim().to_string(),
            });
        }
    }

    let weekly_trend = weekly.finalize(|week_key, tally| WeeklyNonVisits {
        week_key,
        metrics: tally.into(),
    });

    let mut reason_distribution = reasons.finalize(|category, count| ReasonShare {
        category,
        count,
        share: rate(count, totals.non_visits),
    });
    reason_distribution.sort_by(|left, right| {
        right
            .count
            .cmp(&left.count)
            .then_with(|| left.category.cmp(&right.category))
    });

    let mut by_salesperson = by_salesperson.finalize(|salesman_id, tally| {
        let profile = directory.profile(&salesman_id);
        SalespersonNonVisits {
            salesman_id,
            salesman_name: profile.name,
            main_team: profile.main_team,
            team: profile.team,
            sub_team: profile.sub_team,
            metrics: tally.into(),
        }
    });
    by_salesperson.sort_by(|left, right| {
        right
            .metrics
            .non_visits
            .cmp(&left.metrics.non_visits)
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
    });

    drilldown.sort_by(|left, right| {
        right
            .date
            .cmp(&left.date)
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
            .then_with(|| left.customer_name.cmp(&right.customer_name))
    });
    drilldown.truncate(DRILLDOWN_LIMIT);

    let recurrence_window = RecurrenceWindow {
        from_date: input.range.from_date - Duration::weeks(RECURRENCE_LOOKBACK_WEEKS),
        to_date: input.range.to_date,
    };
    let top_repeated_customers =
        repeated_customers(input.reports, &recurrence_window, &directory, &filters);

    Stage3Payload {
        range: input.range.clone(),
        filters,
        recurrence_window,
        totals: totals.into(),
        weekly_trend,
        reason_distribution,
        by_salesperson,
        top_repeated_customers,
        drilldown,
        filter_options: directory.filter_options(),
    }
}

struct NonVisitHit<'a> {
    date: NaiveDate,
    salesman_id: &'a str,
    customer_name: &'a str,
    normalized_customer: String,
    category: ReasonCategory,
}

#[derive(Default)]
struct Recurrence {
    customer_name: String,
    weeks: BTreeSet<String>,
    occurrences: u32,
    last_date: Option<NaiveDate>,
    // category counts in first-seen order
    reasons: Vec<(&'static str, u32)>,
}

impl Recurrence {
    fn dominant_reason(&self) -> &'static str {
        let mut best: Option<(&'static str, u32)> = None;
        for &(category, count) in &self.reasons {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((category, count));
            }
        }
        best.map_or(ReasonCategory::Blank.bucket(), |(category, _)| category)
    }
}

fn repeated_customers(
    reports: &[WeeklyReport],
    window: &RecurrenceWindow,
    directory: &UserDirectory<'_>,
    filters: &ScopeFilters,
) -> Vec<RepeatedCustomer> {
    let mut hits = Vec::new();
    for report in reports {
        for row in &report.planning_rows {
            if !row.is_meaningful() {
                continue;
            }
            let Some(date) = parse_date_key(&row.date) else {
                continue;
            };
            if date < window.from_date || date > window.to_date {
                continue;
            }
            let Some(actual) = report
                .actual_row_for(&row.date)
                .filter(|item| item.visited == Visited::No)
            else {
                continue;
            };
            let normalized_customer = normalize_customer_name(&row.customer_name);
            if normalized_customer.is_empty() {
                continue;
            }
            hits.push(NonVisitHit {
                date,
                salesman_id: &report.salesman_id,
                customer_name: row.customer_name.trim(),
                normalized_customer,
                category: actual.not_visited_reason_category,
            });
        }
    }
    // Chronological replay keeps "first encountered" stable across inputs.
    hits.sort_by(|left, right| {
        left.date
            .cmp(&right.date)
            .then_with(|| left.salesman_id.cmp(right.salesman_id))
            .then_with(|| left.normalized_customer.cmp(&right.normalized_customer))
            .then_with(|| left.category.as_str().cmp(right.category.as_str()))
    });

    let mut recurrences: BTreeMap<(String, String), Recurrence> = BTreeMap::new();
    for hit in hits {
        let entry = recurrences
            .entry((hit.salesman_id.to_string(), hit.normalized_customer))
            .or_default();
        entry.customer_name = hit.customer_name.to_string();
        entry.weeks.insert(iso_week_label(hit.date));
        entry.occurrences += 1;
        entry.last_date = Some(hit.date);
        let category = hit.category.bucket();
        match entry.reasons.iter_mut().find(|(name, _)| *name == category) {
            Some((_, count)) => *count += 1,
            None => entry.reasons.push((category, 1)),
        }
    }

    let mut repeated = recurrences
        .into_iter()
        .filter(|(_, recurrence)| recurrence.weeks.len() >= MIN_REPEAT_WEEKS)
        .filter_map(|((salesman_id, normalized_customer), recurrence)| {
            let profile = directory.profile(&salesman_id);
            if !filters.matches(&profile) {
                return None;
            }
            Some(RepeatedCustomer {
                dominant_reason_category: recurrence.dominant_reason().to_string(),
                salesman_id,
                salesman_name: profile.name,
                team: profile.team,
                customer_name: recurrence.customer_name,
                normalized_customer,
                occurrences_8w: recurrence.occurrences,
                distinct_weeks: recurrence.weeks.len() as u32,
                weeks: recurrence.weeks.into_iter().collect(),
                last_non_visit_date: recurrence
                    .last_date
                    .map(format_date_key)
                    .unwrap_or_default(),
            })
        })
        .collect::<Vec<_>>();
    repeated.sort_by(|left, right| {
        right
            .occurrences_8w
            .cmp(&left.occurrences_8w)
            .then_with(|| right.last_non_visit_date.cmp(&left.last_non_visit_date))
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
            .then_with(|| left.normalized_customer.cmp(&right.normalized_customer))
    });
    repeated.truncate(TOP_REPEATED_LIMIT);
    repeated
}

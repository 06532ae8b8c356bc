//! Company-wide KPI dashboard: weekly trend, customer segments, weekday
//! productivity and the enquiry-to-shipment lag.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

use crate::models::{CustomerType, User, Visited, WeeklyReport};

use super::directory::{FilterOptions, ScopeFilters, UserDirectory};
use super::metrics::{normalize_customer_name, rate, round2, Accumulator};
use super::ranges::WeekRange;
use super::week::{format_date_key, monday_of, parse_date_key};

pub const NO_LAG_SAMPLES_NOTE: &str =
    "No customer had an enquiry followed by a later shipment in this range.";

pub struct InsightsInput<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a WeekRange,
    pub filters: &'a ScopeFilters,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OutcomeTally {
    planned_visits: u32,
    actual_visits: u32,
    enquiries: u32,
    shipments: u32,
}

impl OutcomeTally {
    fn record(&mut self, visited: bool, enquiries: u32, shipments: u32) {
        self.planned_visits += 1;
        if visited {
            self.actual_visits += 1;
        }
        self.enquiries += enquiries;
        self.shipments += shipments;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeMetrics {
    pub planned_visits: u32,
    pub actual_visits: u32,
    pub enquiries: u32,
    pub shipments: u32,
    pub visit_completion_rate: f64,
    pub enquiry_per_visit: f64,
    pub shipment_conversion: f64,
}

impl From<OutcomeTally> for OutcomeMetrics {
    fn from(tally: OutcomeTally) -> Self {
        Self {
            planned_visits: tally.planned_visits,
            actual_visits: tally.actual_visits,
            enquiries: tally.enquiries,
            shipments: tally.shipments,
            visit_completion_rate: rate(tally.actual_visits, tally.planned_visits),
            enquiry_per_visit: rate(tally.enquiries, tally.actual_visits),
            shipment_conversion: rate(tally.shipments, tally.enquiries),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsKpis {
    #[serde(flatten)]
    pub metrics: OutcomeMetrics,
    pub active_salespeople: u32,
    pub tracked_customers: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyInsight {
    pub week_key: String,
    pub iso_week: String,
    #[serde(flatten)]
    pub metrics: OutcomeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentConversion {
    /// `new` or `existing`.
    pub segment: String,
    #[serde(flatten)]
    pub metrics: OutcomeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekdayProductivity {
    pub weekday: String,
    /// Monday = 1 .. Sunday = 7.
    pub day_number: u32,
    pub visits: u32,
    pub enquiries: u32,
    pub shipments: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnquiryLag {
    pub average_days_enquiry_to_shipment: Option<f64>,
    pub samples: u32,
    pub min_days: Option<i64>,
    pub max_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightsPayload {
    pub range: WeekRange,
    pub filters: ScopeFilters,
    pub kpis: InsightsKpis,
    pub weekly_trend: Vec<WeeklyInsight>,
    pub customer_segments: Vec<SegmentConversion>,
    pub weekday_productivity: Vec<WeekdayProductivity>,
    pub most_productive_day: Option<String>,
    pub enquiry_lag: EnquiryLag,
    pub notes: Vec<String>,
    pub filter_options: FilterOptions,
}

/// `new` covers targeted/budgeted and every legacy "new customer" spelling,
/// all of which decode to the same variant.
fn segment_of(customer_type: CustomerType) -> Option<&'static str> {
    match customer_type {
        CustomerType::TargetedBudgeted => Some("new"),
        CustomerType::Existing => Some("existing"),
        CustomerType::Blank => None,
    }
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_label(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

struct CustomerEvent {
    date: NaiveDate,
    enquiries: u32,
    shipments: u32,
}

pub fn build_insights_payload(input: InsightsInput<'_>) -> InsightsPayload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();

    let mut totals = OutcomeTally::default();
    let mut weekly: Accumulator<String, OutcomeTally> = Accumulator::new();
    let mut segments: Accumulator<&'static str, OutcomeTally> = Accumulator::new();
    // Monday = 0 .. Sunday = 6
    let mut weekdays = [OutcomeTally::default(); 7];
    let mut active_salespeople = BTreeSet::new();
    let mut customers: BTreeMap<(String, String), Vec<CustomerEvent>> = BTreeMap::new();
    for week in &input.range.weeks {
        weekly.touch(week.key.clone());
    }
    segments.touch("new");
    segments.touch("existing");

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
            let (visited, enquiries, shipments) = report
                .actual_row_for(&row.date)
                .map(|actual| {
                    (
                        actual.visited == Visited::Yes,
                        actual.enquiries_received,
                        actual.shipments_converted,
                    )
                })
                .unwrap_or((false, 0, 0));

            totals.record(visited, enquiries, shipments);
            weekly
                .entry(format_date_key(monday_of(date)))
                .record(visited, enquiries, shipments);
            if let Some(segment) = segment_of(row.customer_type) {
                segments.entry(segment).record(visited, enquiries, shipments);
            }
            weekdays[date.weekday().num_days_from_monday() as usize]
                .record(visited, enquiries, shipments);
            if visited {
                active_salespeople.insert(profile.id.clone());
            }

            let normalized_customer = normalize_customer_name(&row.customer_name);
            if !normalized_customer.is_empty() {
                customers
                    .entry((profile.id.clone(), normalized_customer))
                    .or_default()
                    .push(CustomerEvent {
                        date,
                        enquiries,
                        shipments,
                    });
            }
        }
    }

    let tracked_customers = customers.len() as u32;
    let enquiry_lag = enquiry_lag(customers.into_values());
    let mut notes = Vec::new();
    if enquiry_lag.average_days_enquiry_to_shipment.is_none() {
        notes.push(NO_LAG_SAMPLES_NOTE.to_string());
    }

    let weekly_trend = weekly.finalize(|week_key, tally| WeeklyInsight {
        iso_week: input
            .range
            .weeks
            .iter()
            .find(|week| week.key == week_key)
            .map(|week| week.iso_week.clone())
            .unwrap_or_default(),
        week_key,
        metrics: tally.into(),
    });

    let mut customer_segments = segments.finalize(|segment, tally| SegmentConversion {
        segment: segment.to_string(),
        metrics: tally.into(),
    });
    // "new" ahead of "existing"
    customer_segments.reverse();

    let weekday_productivity = WEEKDAYS
        .into_iter()
        .zip(weekdays)
        .map(|(weekday, tally)| {
            WeekdayProductivity {
                weekday: weekday_label(weekday).to_string(),
                day_number: weekday.number_from_monday(),
                visits: tally.actual_visits,
                enquiries: tally.enquiries,
                shipments: tally.shipments,
            }
        })
        .collect::<Vec<_>>();
    let most_productive_day = most_productive_day(&weekday_productivity);

    InsightsPayload {
        range: input.range.clone(),
        filters,
        kpis: InsightsKpis {
            metrics: totals.into(),
            active_salespeople: active_salespeople.len() as u32,
            tracked_customers,
        },
        weekly_trend,
        customer_segments,
        weekday_productivity,
        most_productive_day,
        enquiry_lag,
        notes,
        filter_options: directory.filter_options(),
    }
}

/// Highest shipments, then enquiries; earlier weekday wins a full tie.
fn most_productive_day(days: &[WeekdayProductivity]) -> Option<String> {
    let mut best: Option<&WeekdayProductivity> = None;
    for day in days.iter().filter(|day| day.visits > 0) {
        let better = match best {
            None => true,
            Some(current) => {
                (day.shipments, day.enquiries) > (current.shipments, current.enquiries)
            }
        };
        if better {
            best = Some(day);
        }
    }
    best.map(|day| day.weekday.clone())
}

/// Per customer: first row with an enquiry, then the first strictly later
/// row with a shipment.
fn enquiry_lag(journeys: impl Iterator<Item = Vec<CustomerEvent>>) -> EnquiryLag {
    let mut lags = Vec::new();
    for mut events in journeys {
        events.sort_by_key(|event| event.date);
        let Some(enquiry) = events.iter().find(|event| event.enquiries > 0) else {
            continue;
        };
        let shipment = events
            .iter()
            .find(|event| event.date > enquiry.date && event.shipments > 0);
        if let Some(shipment) = shipment {
            lags.push((shipment.date - enquiry.date).num_days());
        }
    }

    let samples = lags.len() as u32;
    let average = (!lags.is_empty())
        .then(|| round2(lags.iter().sum::<i64>() as f64 / lags.len() as f64));
    EnquiryLag {
        average_days_enquiry_to_shipment: average,
        samples,
        min_days: lags.iter().min().copied(),
        max_days: lags.iter().max().copied(),
    }
}

//! Stage 4: enquiry effectiveness per salesperson, per team (HOD) and per
//! week, with volume-without-conversion flags.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{ContactType, User, Visited, WeeklyReport};

use super::directory::{label_matches, FilterOptions, SalesProfile, ScopeFilters, UserDirectory};
use super::metrics::{non_empty_opt, rate, safe_divide, Accumulator};
use super::ranges::WeekRange;
use super::week::{format_date_key, iso_week_label, monday_of, parse_date_key};

pub const DEFAULT_MIN_VISITS_FOR_LOW_ENQUIRY: f64 = 12.0;
pub const DEFAULT_MIN_ENQUIRY_PER_VISIT: f64 = 0.25;
pub const DEFAULT_MIN_ENQUIRIES_FOR_LOW_CONVERSION: f64 = 6.0;
pub const DEFAULT_MIN_SHIPMENT_CONVERSION: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage4Thresholds {
    pub min_visits_for_low_enquiry: f64,
    pub min_enquiry_per_visit: f64,
    pub min_enquiries_for_low_conversion: f64,
    pub min_shipment_conversion: f64,
}

impl Default for Stage4Thresholds {
    fn default() -> Self {
        Self {
            min_visits_for_low_enquiry: DEFAULT_MIN_VISITS_FOR_LOW_ENQUIRY,
            min_enquiry_per_visit: DEFAULT_MIN_ENQUIRY_PER_VISIT,
            min_enquiries_for_low_conversion: DEFAULT_MIN_ENQUIRIES_FOR_LOW_CONVERSION,
            min_shipment_conversion: DEFAULT_MIN_SHIPMENT_CONVERSION,
        }
    }
}

/// Raw per-request overrides as they arrive on the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage4ThresholdOverrides {
    pub min_visits_for_low_enquiry: Option<String>,
    pub min_enquiry_per_visit: Option<String>,
    pub min_enquiries_for_low_conversion: Option<String>,
    pub min_shipment_conversion: Option<String>,
}

impl Stage4Thresholds {
    /// Layers overrides on top of `self`; anything negative, non-finite or
    /// unparsable keeps the base value.
    pub fn with_overrides(&self, overrides: &Stage4ThresholdOverrides) -> Self {
        Self {
            min_visits_for_low_enquiry: override_or(
                overrides.min_visits_for_low_enquiry.as_deref(),
                self.min_visits_for_low_enquiry,
            ),
            min_enquiry_per_visit: override_or(
                overrides.min_enquiry_per_visit.as_deref(),
                self.min_enquiry_per_visit,
            ),
            min_enquiries_for_low_conversion: override_or(
                overrides.min_enquiries_for_low_conversion.as_deref(),
                self.min_enquiries_for_low_conversion,
            ),
            min_shipment_conversion: override_or(
                overrides.min_shipment_conversion.as_deref(),
                self.min_shipment_conversion,
            ),
        }
    }
}

fn override_or(raw: Option<&str>, fallback: f64) -> f64 {
    raw.map(str::trim)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value >= 0.0)
        .unwrap_or(fallback)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage4Filters {
    #[serde(flatten)]
    pub scope: ScopeFilters,
    /// `nc`, `fc`, `sc`, `jsv` or `unknown`.
    pub visit_type: Option<String>,
    pub customer_type: Option<String>,
    /// Case-insensitive substring of the planned location.
    pub location: Option<String>,
    /// Only narrows JSV rows; other contact types pass through.
    pub jsv_admin_id: Option<String>,
}

impl Stage4Filters {
    pub fn normalized(&self) -> Self {
        Self {
            scope: self.scope.normalized(),
            visit_type: non_empty_opt(self.visit_type.as_deref()),
            customer_type: non_empty_opt(self.customer_type.as_deref()),
            location: non_empty_opt(self.location.as_deref()),
            jsv_admin_id: non_empty_opt(self.jsv_admin_id.as_deref()),
        }
    }
}

pub struct Stage4Input<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a WeekRange,
    pub filters: &'a Stage4Filters,
    pub thresholds: Stage4Thresholds,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct EffectivenessTally {
    planned_visits: u32,
    actual_visits: u32,
    enquiries: u32,
    shipments: u32,
}

impl EffectivenessTally {
    fn record(&mut self, visited: bool, enquiries: u32, shipments: u32) {
        self.planned_visits += 1;
        if visited {
            self.actual_visits += 1;
        }
        self.enquiries += enquiries;
        self.shipments += shipments;
    }

    fn enquiry_per_visit(&self) -> f64 {
        safe_divide(f64::from(self.enquiries), f64::from(self.actual_visits))
    }

    fn shipment_conversion(&self) -> f64 {
        safe_divide(f64::from(self.shipments), f64::from(self.enquiries))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessMetrics {
    pub planned_visits: u32,
    pub actual_visits: u32,
    pub enquiries: u32,
    pub shipments: u32,
    pub enquiry_per_visit: f64,
    pub shipment_conversion: f64,
}

impl From<EffectivenessTally> for EffectivenessMetrics {
    fn from(tally: EffectivenessTally) -> Self {
        Self {
            planned_visits: tally.planned_visits,
            actual_visits: tally.actual_visits,
            enquiries: tally.enquiries,
            shipments: tally.shipments,
            enquiry_per_visit: rate(tally.enquiries, tally.actual_visits),
            shipment_conversion: rate(tally.shipments, tally.enquiries),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagRule {
    HighVisitsLowEnquiry,
    LowConversion,
}

impl FlagRule {
    pub fn severity(self) -> FlagSeverity {
        match self {
            Self::HighVisitsLowEnquiry => FlagSeverity::Warning,
            Self::LowConversion => FlagSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivenessFlag {
    pub rule: FlagRule,
    pub severity: FlagSeverity,
    pub message: String,
}

fn evaluate_flags(tally: &EffectivenessTally, thresholds: &Stage4Thresholds) -> Vec<EffectivenessFlag> {
    let mut flags = Vec::new();
    if f64::from(tally.actual_visits) >= thresholds.min_visits_for_low_enquiry
        && tally.enquiry_per_visit() < thresholds.min_enquiry_per_visit
    {
        flags.push(EffectivenessFlag {
            rule: FlagRule::HighVisitsLowEnquiry,
            severity: FlagRule::HighVisitsLowEnquiry.severity(),
            message: format!(
                "{} visits produced {} enquiries ({:.2} per visit, below {:.2}).",
                tally.actual_visits,
                tally.enquiries,
                tally.enquiry_per_visit(),
                thresholds.min_enquiry_per_visit
            ),
        });
    }
    if f64::from(tally.enquiries) >= thresholds.min_enquiries_for_low_conversion
        && tally.shipment_conversion() < thresholds.min_shipment_conversion
    {
        flags.push(EffectivenessFlag {
            rule: FlagRule::LowConversion,
            severity: FlagRule::LowConversion.severity(),
            message: format!(
                "{} enquiries converted into {} shipments ({:.0}% conversion, below {:.0}%).",
                tally.enquiries,
                tally.shipments,
                tally.shipment_conversion() * 100.0,
                thresholds.min_shipment_conversion * 100.0
            ),
        });
    }
    flags
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SalespersonEffectiveness {
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    #[serde(flatten)]
    pub metrics: EffectivenessMetrics,
    pub flags: Vec<EffectivenessFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEffectiveness {
    pub team: String,
    pub salespeople: u32,
    #[serde(flatten)]
    pub metrics: EffectivenessMetrics,
    pub flags: Vec<EffectivenessFlag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyEffectiveness {
    pub week_key: String,
    pub iso_week: String,
    #[serde(flatten)]
    pub metrics: EffectivenessMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagCount<T> {
    pub key: T,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagSummary {
    pub total_flags: u32,
    pub flagged_salespeople: u32,
    pub flagged_teams: u32,
    pub by_rule: Vec<FlagCount<FlagRule>>,
    pub by_severity: Vec<FlagCount<FlagSeverity>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage4Payload {
    pub range: WeekRange,
    pub filters: Stage4Filters,
    pub thresholds: Stage4Thresholds,
    pub totals: EffectivenessMetrics,
    pub by_salesperson: Vec<SalespersonEffectiveness>,
    pub by_team: Vec<TeamEffectiveness>,
    pub weekly_trend: Vec<WeeklyEffectiveness>,
    pub flag_summary: FlagSummary,
    pub filter_options: FilterOptions,
}

fn row_passes(
    filters: &Stage4Filters,
    contact_type: ContactType,
    customer_bucket: &str,
    location_area: &str,
    jsv_with_whom: &str,
) -> bool {
    if !label_matches(filters.visit_type.as_deref(), contact_type.bucket()) {
        return false;
    }
    if !label_matches(filters.customer_type.as_deref(), customer_bucket) {
        return false;
    }
    if let Some(location) = filters.location.as_deref() {
        if !location_area
            .to_lowercase()
            .contains(&location.to_lowercase())
        {
            return false;
        }
    }
    if contact_type == ContactType::Jsv {
        if let Some(admin_id) = filters.jsv_admin_id.as_deref() {
            return jsv_with_whom.trim() == admin_id;
        }
    }
    true
}

pub fn build_stage4_payload(input: Stage4Input<'_>) -> Stage4Payload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();
    let thresholds = input.thresholds;

    let mut totals = EffectivenessTally::default();
    let mut by_salesperson: Accumulator<String, EffectivenessTally> = Accumulator::new();
    let mut by_team: Accumulator<String, EffectivenessTally> = Accumulator::new();
    let mut team_members: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut weekly: Accumulator<String, EffectivenessTally> = Accumulator::new();
    let mut profiles: BTreeMap<String, SalesProfile> = BTreeMap::new();
    for week in &input.range.weeks {
        weekly.touch(week.key.clone());
    }

    for report in input.reports {
        let profile = directory.profile(&report.salesman_id);
        if !filters.scope.matches(&profile) {
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
            if !row_passes(
                &filters,
                row.contact_type,
                row.customer_type.bucket(),
                &row.location_area,
                &row.jsv_with_whom,
            ) {
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
            by_salesperson
                .entry(profile.id.clone())
                .record(visited, enquiries, shipments);
            by_team
                .entry(profile.team.clone())
                .record(visited, enquiries, shipments);
            team_members
                .entry(profile.team.clone())
                .or_default()
                .insert(profile.id.clone());
            weekly
                .entry(format_date_key(monday_of(date)))
                .record(visited, enquiries, shipments);
            profiles
                .entry(profile.id.clone())
                .or_insert_with(|| profile.clone());
        }
    }

    let mut by_salesperson = by_salesperson.finalize(|salesman_id, tally| {
        let profile = profiles
            .remove(&salesman_id)
            .unwrap_or_else(|| directory.profile(&salesman_id));
        SalespersonEffectiveness {
            salesman_id,
            salesman_name: profile.name,
            main_team: profile.main_team,
            team: profile.team,
            sub_team: profile.sub_team,
            flags: evaluate_flags(&tally, &thresholds),
            metrics: tally.into(),
        }
    });
    by_salesperson.sort_by(|left, right| {
        right
            .flags
            .len()
            .cmp(&left.flags.len())
            .then_with(|| right.metrics.actual_visits.cmp(&left.metrics.actual_visits))
            .then_with(|| left.salesman_name.cmp(&right.salesman_name))
            .then_with(|| left.salesman_id.cmp(&right.salesman_id))
    });

    let mut by_team = by_team.finalize(|team, tally| TeamEffectiveness {
        salespeople: team_members.get(&team).map_or(0, |members| members.len() as u32),
        team,
        flags: evaluate_flags(&tally, &thresholds),
        metrics: tally.into(),
    });
    by_team.sort_by(|left, right| {
        right
            .flags
            .len()
            .cmp(&left.flags.len())
            .then_with(|| right.metrics.actual_visits.cmp(&left.metrics.actual_visits))
            .then_with(|| left.team.cmp(&right.team))
    });

    let weekly_trend = weekly.finalize(|week_key, tally| WeeklyEffectiveness {
        iso_week: parse_date_key(&week_key)
            .map(iso_week_label)
            .unwrap_or_default(),
        week_key,
        metrics: tally.into(),
    });

    let flag_summary = summarize_flags(
        by_salesperson.iter().map(|row| row.flags.as_slice()),
        by_team.iter().map(|row| row.flags.as_slice()),
    );

    Stage4Payload {
        range: input.range.clone(),
        filters,
        thresholds,
        totals: totals.into(),
        by_salesperson,
        by_team,
        weekly_trend,
        flag_summary,
        filter_options: directory.filter_options(),
    }
}

fn summarize_flags<'a>(
    salespeople: impl Iterator<Item = &'a [EffectivenessFlag]>,
    teams: impl Iterator<Item = &'a [EffectivenessFlag]>,
) -> FlagSummary {
    let mut by_rule: BTreeMap<FlagRule, u32> = [FlagRule::HighVisitsLowEnquiry, FlagRule::LowConversion]
        .into_iter()
        .map(|rule| (rule, 0))
        .collect();
    let mut by_severity: BTreeMap<FlagSeverity, u32> = [FlagSeverity::Warning, FlagSeverity::Critical]
        .into_iter()
        .map(|severity| (severity, 0))
        .collect();
    let mut total_flags = 0;
    let mut flagged_salespeople = 0;
    let mut flagged_teams = 0;

    let mut tally = |flags: &[EffectivenessFlag]| {
        for flag in flags {
            total_flags += 1;
            *by_rule.entry(flag.rule).or_default() += 1;
            *by_severity.entry(flag.severity).or_default() += 1;
        }
        !flags.is_empty()
    };
    for flags in salespeople {
        if tally(flags) {
            flagged_salespeople += 1;
        }
    }
    for flags in teams {
        if tally(flags) {
            flagged_teams += 1;
        }
    }

    FlagSummary {
        total_flags,
        flagged_salespeople,
        flagged_teams,
        by_rule: by_rule
            .into_iter()
            .map(|(key, count)| FlagCount { key, count })
            .collect(),
        by_severity: by_severity
            .into_iter()
            .map(|(key, count)| FlagCount { key, count })
            .collect(),
    }
}

//! Stage 5: exception and quality detection.
//!
//! Candidate detection replays visited rows into per-customer journeys and
//! applies rules EX-01..EX-04. The payload works over persisted cases, and
//! the status state machine gates every admin transition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::models::{
    ContactType, ExceptionCase, ExceptionRule, ExceptionStatus, JourneyMetrics, JourneyVisit,
    StatusChange, User, Visited, WeeklyReport,
};

use super::directory::{label_matches, FilterOptions, SalesProfile, ScopeFilters, UserDirectory};
use super::metrics::{non_empty_opt, normalize_customer_name};
use super::ranges::WeekRange;
use super::week::{days_between, format_date_key, ist_date, monday_of, parse_date_key};

pub const FOLLOWUP_STAGNATION_MIN_VISITS: u32 = 3;
pub const UNASSIGNED_OWNER: &str = "unassigned";

pub fn case_key(rule: ExceptionRule, salesman_id: &str, normalized_customer: &str) -> String {
    format!("{}|{salesman_id}|{normalized_customer}", rule.as_str())
}

/// Rule encoded in the first segment of a case key.
pub fn rule_from_case_key(case_key: &str) -> Option<ExceptionRule> {
    case_key.split('|').next().and_then(ExceptionRule::parse)
}

/// Rules a journey currently violates, in rule order.
pub fn matching_rules(metrics: &JourneyMetrics) -> Vec<ExceptionRule> {
    ExceptionRule::ALL
        .into_iter()
        .filter(|rule| match rule {
            ExceptionRule::SingleVisitNoFollowup => metrics.total_visited == 1,
            ExceptionRule::RepeatVisitNoEnquiry => {
                metrics.total_visited > 1 && metrics.total_enquiries == 0
            }
            ExceptionRule::RepeatVisitNoJsv => metrics.total_visited > 1 && metrics.jsv_count == 0,
            ExceptionRule::FollowupStagnation => {
                metrics.followup_visit_count >= FOLLOWUP_STAGNATION_MIN_VISITS
                    && metrics.total_shipments == 0
            }
        })
        .collect()
}

pub struct Stage5CandidateInput<'a> {
    pub users: &'a [User],
    pub reports: &'a [WeeklyReport],
    pub range: &'a WeekRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionCandidate {
    pub case_key: String,
    pub rule_id: ExceptionRule,
    pub rule_label: String,
    pub salesman_id: String,
    pub salesman_name: String,
    pub main_team: String,
    pub team: String,
    pub sub_team: String,
    pub customer_name: String,
    pub normalized_customer: String,
    pub metrics: JourneyMetrics,
    pub timeline: Vec<JourneyVisit>,
    pub first_seen_date: String,
    pub last_seen_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage5Candidates {
    pub candidates: Vec<ExceptionCandidate>,
    pub filter_options: FilterOptions,
}

struct Journey {
    profile: SalesProfile,
    customer_name: String,
    metrics: JourneyMetrics,
    timeline: Vec<JourneyVisit>,
}

pub fn build_stage5_candidates(input: Stage5CandidateInput<'_>) -> Stage5Candidates {
    let directory = UserDirectory::new(input.users);
    let mut journeys: BTreeMap<(String, String), Journey> = BTreeMap::new();

    for report in input.reports {
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
            let Some(actual) = report
                .actual_row_for(&row.date)
                .filter(|item| item.visited == Visited::Yes)
            else {
                continue;
            };
            let normalized_customer = normalize_customer_name(&row.customer_name);
            if normalized_customer.is_empty() {
                continue;
            }

            let journey = journeys
                .entry((report.salesman_id.clone(), normalized_customer))
                .or_insert_with(|| Journey {
                    profile: directory.profile(&report.salesman_id),
                    customer_name: String::new(),
                    metrics: JourneyMetrics::default(),
                    timeline: Vec::new(),
                });
            journey.metrics.total_visited += 1;
            journey.metrics.total_enquiries += actual.enquiries_received;
            journey.metrics.total_shipments += actual.shipments_converted;
            if row.contact_type == ContactType::Jsv {
                journey.metrics.jsv_count += 1;
            }
            if row.contact_type.is_followup() {
                journey.metrics.followup_visit_count += 1;
            }
            journey.timeline.push(JourneyVisit {
                date: row.date.clone(),
                week_key: format_date_key(monday_of(date)),
                contact_type: row.contact_type,
                customer_type: row.customer_type,
                location_area: row.location_area.trim().to_string(),
                jsv_with_whom: row.jsv_with_whom.trim().to_string(),
                enquiries: actual.enquiries_received,
                shipments: actual.shipments_converted,
            });
            // display name comes from the earliest visit
            let earliest = journey.timeline.iter().all(|visit| visit.date >= row.date);
            if journey.customer_name.is_empty() || earliest {
                journey.customer_name = row.customer_name.trim().to_string();
            }
        }
    }

    let mut candidates = Vec::new();
    for ((salesman_id, normalized_customer), mut journey) in journeys {
        journey.timeline.sort_by(|left, right| left.date.cmp(&right.date));
        let first_seen_date = journey
            .timeline
            .first()
            .map(|visit| visit.date.clone())
            .unwrap_or_default();
        let last_seen_date = journey
            .timeline
            .last()
            .map(|visit| visit.date.clone())
            .unwrap_or_default();
        for rule in matching_rules(&journey.metrics) {
            candidates.push(ExceptionCandidate {
                case_key: case_key(rule, &salesman_id, &normalized_customer),
                rule_id: rule,
                rule_label: rule.label().to_string(),
                salesman_id: salesman_id.clone(),
                salesman_name: journey.profile.name.clone(),
                main_team: journey.profile.main_team.clone(),
                team: journey.profile.team.clone(),
                sub_team: journey.profile.sub_team.clone(),
                customer_name: journey.customer_name.clone(),
                normalized_customer: normalized_customer.clone(),
                metrics: journey.metrics.clone(),
                timeline: journey.timeline.clone(),
                first_seen_date: first_seen_date.clone(),
                last_seen_date: last_seen_date.clone(),
            });
        }
    }
    candidates.sort_by(|left, right| left.case_key.cmp(&right.case_key));

    Stage5Candidates {
        candidates,
        filter_options: directory.filter_options(),
    }
}

/// A freshly detected case starts open and unowned.
pub fn open_case(candidate: ExceptionCandidate, now: DateTime<Utc>) -> ExceptionCase {
    ExceptionCase {
        case_key: candidate.case_key,
        rule_id: candidate.rule_id,
        rule_label: candidate.rule_label,
        salesman_id: candidate.salesman_id,
        salesman_name: candidate.salesman_name,
        main_team: candidate.main_team,
        team: candidate.team,
        sub_team: candidate.sub_team,
        customer_name: candidate.customer_name,
        normalized_customer: candidate.normalized_customer,
        status: ExceptionStatus::Open,
        owner_admin_id: None,
        metrics: candidate.metrics,
        timeline: candidate.timeline,
        first_seen_date: candidate.first_seen_date,
        last_seen_date: candidate.last_seen_date,
        status_history: Vec::new(),
        resolved_at: None,
        created_at: Some(now),
        updated_at: Some(now),
    }
}

/// Re-detection refreshes the evidence but never the workflow state
/// (status, owner, history, resolution).
pub fn refresh_case(case: &mut ExceptionCase, candidate: ExceptionCandidate, now: DateTime<Utc>) {
    case.rule_label = candidate.rule_label;
    case.salesman_name = candidate.salesman_name;
    case.main_team = candidate.main_team;
    case.team = candidate.team;
    case.sub_team = candidate.sub_team;
    case.customer_name = candidate.customer_name;
    case.metrics = candidate.metrics;
    case.timeline = candidate.timeline;
    if case.first_seen_date.is_empty()
        || (!candidate.first_seen_date.is_empty() && candidate.first_seen_date < case.first_seen_date)
    {
        case.first_seen_date = candidate.first_seen_date;
    }
    case.last_seen_date = candidate.last_seen_date;
    case.updated_at = Some(now);
}

pub fn is_allowed_status_transition(current: ExceptionStatus, next: ExceptionStatus) -> bool {
    if current == next {
        return true;
    }
    match current {
        ExceptionStatus::Open => matches!(
            next,
            ExceptionStatus::InReview | ExceptionStatus::Resolved | ExceptionStatus::Ignored
        ),
        ExceptionStatus::InReview => matches!(
            next,
            ExceptionStatus::Open | ExceptionStatus::Resolved | ExceptionStatus::Ignored
        ),
        ExceptionStatus::Resolved | ExceptionStatus::Ignored => next == ExceptionStatus::Open,
    }
}

pub fn validate_status_transition(current: ExceptionStatus, next: ExceptionStatus) -> AppResult<()> {
    if is_allowed_status_transition(current, next) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "Invalid status transition from '{}' to '{}'.",
            current.as_str(),
            next.as_str()
        )))
    }
}

/// Validates, then records the transition on the case. The acting admin
/// takes ownership of an unowned case.
pub fn apply_status_transition(
    case: &mut ExceptionCase,
    next: ExceptionStatus,
    changed_by: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> AppResult<StatusChange> {
    validate_status_transition(case.status, next)?;

    let change = StatusChange {
        from: case.status,
        to: next,
        changed_by: changed_by.to_string(),
        note: note.map(str::trim).unwrap_or_default().to_string(),
        changed_at: Some(now),
    };
    match next {
        ExceptionStatus::Resolved => {
            if case.status != ExceptionStatus::Resolved || case.resolved_at.is_none() {
                case.resolved_at = Some(now);
            }
        }
        ExceptionStatus::Open | ExceptionStatus::InReview => case.resolved_at = None,
        ExceptionStatus::Ignored => {}
    }
    if case.owner_admin_id.is_none() {
        case.owner_admin_id = Some(changed_by.to_string());
    }
    case.status = next;
    case.updated_at = Some(now);
    case.status_history.push(change.clone());
    Ok(change)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AgeingBucket {
    #[serde(rename = "0-7")]
    UpToWeek,
    #[serde(rename = "8-14")]
    UpToFortnight,
    #[serde(rename = "15+")]
    Older,
}

impl AgeingBucket {
    pub const ALL: [Self; 3] = [Self::UpToWeek, Self::UpToFortnight, Self::Older];

    pub fn for_days(days: i64) -> Self {
        match days {
            ..=7 => Self::UpToWeek,
            8..=14 => Self::UpToFortnight,
            _ => Self::Older,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToWeek => "0-7",
            Self::UpToFortnight => "8-14",
            Self::Older => "15+",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|bucket| bucket.as_str() == raw.trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stage5Filters {
    #[serde(flatten)]
    pub scope: ScopeFilters,
    /// Admin id, or `unassigned` for cases nobody has picked up.
    pub owner_admin_id: Option<String>,
    pub rule_id: Option<String>,
    pub status: Option<String>,
    /// Case-insensitive substring of the customer name.
    pub customer: Option<String>,
    pub ageing_bucket: Option<String>,
}

impl Stage5Filters {
    pub fn normalized(&self) -> Self {
        Self {
            scope: self.scope.normalized(),
            owner_admin_id: non_empty_opt(self.owner_admin_id.as_deref()),
            rule_id: non_empty_opt(self.rule_id.as_deref()),
            status: non_empty_opt(self.status.as_deref()),
            customer: non_empty_opt(self.customer.as_deref()),
            ageing_bucket: non_empty_opt(self.ageing_bucket.as_deref()),
        }
    }

    /// Rejects values that can never match so callers get a 400 instead
    /// of an empty list.
    pub fn validate(&self) -> AppResult<()> {
        if let Some(rule) = self.rule_id.as_deref() {
            if ExceptionRule::parse(rule).is_none() {
                return Err(AppError::BadRequest(format!("Unknown rule '{rule}'.")));
            }
        }
        if let Some(status) = self.status.as_deref() {
            if ExceptionStatus::parse(status).is_none() {
                return Err(AppError::BadRequest(format!("Unknown status '{status}'.")));
            }
        }
        if let Some(bucket) = self.ageing_bucket.as_deref() {
            if AgeingBucket::parse(bucket).is_none() {
                return Err(AppError::BadRequest(format!(
                    "Unknown ageing bucket '{bucket}'. Use 0-7, 8-14 or 15+."
                )));
            }
        }
        Ok(())
    }
}

pub struct Stage5Input<'a> {
    pub users: &'a [User],
    pub cases: &'a [ExceptionCase],
    pub range: &'a WeekRange,
    pub filters: &'a Stage5Filters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionCaseView {
    #[serde(flatten)]
    pub case: ExceptionCase,
    pub ageing_days: i64,
    pub ageing_bucket: AgeingBucket,
    pub owner_admin_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountByKey {
    pub key: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerBacklog {
    pub owner_admin_id: Option<String>,
    pub owner_name: String,
    pub open_cases: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage5Summary {
    pub total_cases: u32,
    pub open_cases: u32,
    pub by_status: Vec<CountByKey>,
    pub open_by_rule: Vec<CountByKey>,
    pub open_by_ageing: Vec<CountByKey>,
    pub owner_backlog: Vec<OwnerBacklog>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseTrendPoint {
    pub week_key: String,
    pub iso_week: String,
    pub opened: u32,
    pub resolved: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage5Payload {
    pub range: WeekRange,
    pub filters: Stage5Filters,
    pub summary: Stage5Summary,
    pub trend: Vec<CaseTrendPoint>,
    pub cases: Vec<ExceptionCaseView>,
    pub filter_options: FilterOptions,
}

fn case_matches(
    filters: &Stage5Filters,
    case: &ExceptionCase,
    bucket: AgeingBucket,
) -> bool {
    let profile = SalesProfile {
        id: case.salesman_id.clone(),
        name: case.salesman_name.clone(),
        main_team: case.main_team.clone(),
        team: case.team.clone(),
        sub_team: case.sub_team.clone(),
    };
    if !filters.scope.matches(&profile) {
        return false;
    }
    if let Some(owner) = filters.owner_admin_id.as_deref() {
        let matched = match case.owner_admin_id.as_deref() {
            Some(current) => current == owner,
            None => owner.eq_ignore_ascii_case(UNASSIGNED_OWNER),
        };
        if !matched {
            return false;
        }
    }
    if !label_matches(filters.rule_id.as_deref(), case.rule_id.as_str()) {
        return false;
    }
    if !label_matches(filters.status.as_deref(), case.status.as_str()) {
        return false;
    }
    if let Some(customer) = filters.customer.as_deref() {
        let needle = customer.to_lowercase();
        if !case.customer_name.to_lowercase().contains(&needle)
            && !case.normalized_customer.contains(&needle)
        {
            return false;
        }
    }
    label_matches(filters.ageing_bucket.as_deref(), bucket.as_str())
}

pub fn build_stage5_payload(input: Stage5Input<'_>) -> Stage5Payload {
    let directory = UserDirectory::new(input.users);
    let filters = input.filters.normalized();
    let to_date = input.range.to_date();

    let mut cases = Vec::new();
    for case in input.cases {
        // Cases first seen after the range end (or with no usable date) age 0.
        let ageing_days = parse_date_key(&case.first_seen_date)
            .map(|first_seen| days_between(first_seen, to_date).max(0))
            .unwrap_or(0);
        let ageing_bucket = AgeingBucket::for_days(ageing_days);
        if !case_matches(&filters, case, ageing_bucket) {
            continue;
        }
        cases.push(ExceptionCaseView {
            owner_admin_name: case
                .owner_admin_id
                .as_deref()
                .map(|owner| directory.display_name(owner)),
            case: case.clone(),
            ageing_days,
            ageing_bucket,
        });
    }
    cases.sort_by(|left, right| {
        right
            .case
            .status
            .is_active()
            .cmp(&left.case.status.is_active())
            .then_with(|| right.ageing_days.cmp(&left.ageing_days))
            .then_with(|| left.case.case_key.cmp(&right.case.case_key))
    });

    let summary = summarize_cases(&cases, &directory);
    let trend = case_trend(&cases, input.range);

    Stage5Payload {
        range: input.range.clone(),
        filters,
        summary,
        trend,
        cases,
        filter_options: directory.filter_options(),
    }
}

fn summarize_cases(cases: &[ExceptionCaseView], directory: &UserDirectory<'_>) -> Stage5Summary {
    let mut by_status: BTreeMap<ExceptionStatus, u32> =
        ExceptionStatus::ALL.into_iter().map(|status| (status, 0)).collect();
    let mut open_by_rule: BTreeMap<ExceptionRule, u32> =
        ExceptionRule::ALL.into_iter().map(|rule| (rule, 0)).collect();
    let mut open_by_ageing: BTreeMap<AgeingBucket, u32> =
        AgeingBucket::ALL.into_iter().map(|bucket| (bucket, 0)).collect();
    let mut backlog: BTreeMap<Option<String>, u32> = BTreeMap::new();
    let mut open_cases = 0;

    for view in cases {
        *by_status.entry(view.case.status).or_default() += 1;
        if !view.case.status.is_active() {
            continue;
        }
        open_cases += 1;
        *open_by_rule.entry(view.case.rule_id).or_default() += 1;
        *open_by_ageing.entry(view.ageing_bucket).or_default() += 1;
        *backlog.entry(view.case.owner_admin_id.clone()).or_default() += 1;
    }

    let mut owner_backlog = backlog
        .into_iter()
        .map(|(owner_admin_id, open_cases)| OwnerBacklog {
            owner_name: owner_admin_id
                .as_deref()
                .map(|owner| directory.display_name(owner))
                .unwrap_or_else(|| "Unassigned".to_string()),
            owner_admin_id,
            open_cases,
        })
        .collect::<Vec<_>>();
    owner_backlog.sort_by(|left, right| {
        right
            .open_cases
            .cmp(&left.open_cases)
            .then_with(|| left.owner_name.cmp(&right.owner_name))
            .then_with(|| left.owner_admin_id.cmp(&right.owner_admin_id))
    });

    Stage5Summary {
        total_cases: cases.len() as u32,
        open_cases,
        by_status: by_status
            .into_iter()
            .map(|(status, count)| CountByKey {
                key: status.as_str().to_string(),
                count,
            })
            .collect(),
        open_by_rule: open_by_rule
            .into_iter()
            .map(|(rule, count)| CountByKey {
                key: rule.as_str().to_string(),
                count,
            })
            .collect(),
        open_by_ageing: open_by_ageing
            .into_iter()
            .map(|(bucket, count)| CountByKey {
                key: bucket.as_str().to_string(),
                count,
            })
            .collect(),
        owner_backlog,
    }
}

/// Opened counts key on the first-seen week, resolved counts on the IST week
/// of `resolvedAt`; one case can land in two different weeks.
fn case_trend(cases: &[ExceptionCaseView], range: &WeekRange) -> Vec<CaseTrendPoint> {
    let mut points: BTreeMap<String, CaseTrendPoint> = range
        .weeks
        .iter()
        .map(|week| {
            (
                week.key.clone(),
                CaseTrendPoint {
                    week_key: week.key.clone(),
                    iso_week: week.iso_week.clone(),
                    opened: 0,
                    resolved: 0,
                },
            )
        })
        .collect();

    for view in cases {
        if let Some(first_seen) = parse_date_key(&view.case.first_seen_date) {
            if let Some(point) = points.get_mut(&format_date_key(monday_of(first_seen))) {
                point.opened += 1;
            }
        }
        if view.case.status != ExceptionStatus::Resolved {
            continue;
        }
        if let Some(resolved_at) = view.case.resolved_at {
            let week_key = format_date_key(monday_of(ist_date(resolved_at)));
            if let Some(point) = points.get_mut(&week_key) {
                point.resolved += 1;
            }
        }
    }
    points.into_values().collect()
}
